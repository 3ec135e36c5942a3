//! Wires the `DEBUG_ZFS_*` environment variables onto `env_logger`, per
//! subsystem, instead of the usual single `RUST_LOG` string. Each binary
//! calls [`init_from_env`] at the top of `main()`.

use std::env;

use log::LevelFilter;

const SUBSYSTEMS: &[(&str, &str)] = &[
    ("DEBUG_ZFS_BLK", "szfs::zio"),
    ("DEBUG_ZFS_VDEV", "szfs"),
    ("DEBUG_ZFS_ZAP", "szfs::zap"),
    ("DEBUG_ZFS_OBJECT", "szfs::dmu"),
];

fn level_from_int(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init_from_env() {
    let show_header = env::var("DEBUG_ZFS_SHOW_HEADER").as_deref() == Ok("1");

    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Warn);

    for (var, target) in SUBSYSTEMS {
        if let Ok(value) = env::var(var) {
            if let Ok(level) = value.parse::<u8>() {
                builder.filter_module(target, level_from_int(level));
            }
        }
    }

    if show_header {
        builder.format(|buf, record| {
            use std::io::Write as _;
            writeln!(buf, "[{}] {}", record.target(), record.args())
        });
    }

    let _ = builder.try_init();
}
