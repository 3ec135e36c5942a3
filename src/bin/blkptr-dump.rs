//! `blkptr-dump --config <vdev.json> --ptr <vdev>:<offset>:<lsize>[/<psize>][:<flags>]`
//!
//! Reads a raw region directly off a named top-level vdev (bypassing block
//! pointer checksum/DVA resolution, since the caller supplies the address
//! by hand) and optionally decompresses it, prints its checksum, or
//! reinterprets it as a packed array of real 128-byte block pointers.
//!
//! flags: r = write raw bytes to stdout, d = LZ4-decompress psize -> lsize,
//! c = print the Fletcher-4 checksum of the resulting bytes, i = interpret
//! the resulting bytes as a `BlockPointer` array.

use std::collections::HashMap;
use std::io::IsTerminal;

use szfs::{
    ansi_color::*, byte_iter::FromBytesLE, config::PoolConfig, fletcher, pool, zio,
    zio::{BlockPointer, CompressionMethod, Vdevs}, Vdev, VdevFile, VdevRaidz,
};

struct PtrSpec {
    vdev: usize,
    offset: u64,
    lsize: usize,
    psize: usize,
    raw: bool,
    decompress: bool,
    checksum: bool,
    interpret_as_bp_array: bool,
}

fn parse_ptr_spec(spec: &str) -> PtrSpec {
    let parts: Vec<&str> = spec.split(':').collect();
    assert!(
        parts.len() == 3 || parts.len() == 4,
        "--ptr must be <vdev>:<offset>:<lsize>[/<psize>][:<flags>]"
    );

    let vdev = parts[0].parse().expect("vdev id must be a number");
    let offset = parts[1].parse().expect("offset must be a number");

    let (lsize, psize) = match parts[2].split_once('/') {
        Some((lsize, psize)) => (
            lsize.parse().expect("lsize must be a number"),
            psize.parse().expect("psize must be a number"),
        ),
        None => {
            let lsize = parts[2].parse().expect("lsize must be a number");
            (lsize, lsize)
        }
    };

    let flags = parts.get(3).copied().unwrap_or("");
    PtrSpec {
        vdev,
        offset,
        lsize,
        psize,
        raw: flags.contains('r'),
        decompress: flags.contains('d'),
        checksum: flags.contains('c'),
        interpret_as_bp_array: flags.contains('i'),
    }
}

fn main() {
    szfs::logging::init_from_env();

    let mut config_path = None;
    let mut ptr_spec = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().expect("--config requires a path")),
            "--ptr" => ptr_spec = Some(args.next().expect("--ptr requires a spec")),
            other => panic!("unrecognised argument {other}"),
        }
    }
    let config_path = config_path.expect("--config is required");
    let spec = parse_ptr_spec(&ptr_spec.expect("--ptr is required"));

    let config_file = std::fs::File::open(&config_path)
        .unwrap_or_else(|e| panic!("failed to open config {config_path}: {e}"));
    let config: PoolConfig = serde_json::from_reader(config_file).expect("invalid vdev config");

    let mut topology = pool::open_topology(&config).expect("failed to open backing devices");
    let mut leaf_refs: Vec<Option<&mut VdevFile>> =
        topology.leaves.iter_mut().map(Some).collect();

    let mut raidz_storage: Vec<(usize, VdevRaidz)> = Vec::with_capacity(topology.tops.len());
    for (top_id, kind) in &topology.tops {
        if let pool::TopKind::Raidz { ashift, nparity, leaf_indices } = kind {
            let mut children: Vdevs = HashMap::new();
            for (child_id, leaf_index) in leaf_indices.iter().enumerate() {
                children.insert(child_id, leaf_refs[*leaf_index].take().unwrap() as &mut dyn Vdev);
            }
            let ndevices = leaf_indices.len();
            raidz_storage.push((
                *top_id,
                VdevRaidz::from_vdevs(children, ndevices, *nparity, 2usize.pow(*ashift)),
            ));
        }
    }

    let mut vdevs: Vdevs = HashMap::new();
    for (top_id, kind) in &topology.tops {
        if let pool::TopKind::Leaf { leaf_index } = kind {
            vdevs.insert(*top_id, leaf_refs[*leaf_index].take().unwrap() as &mut dyn Vdev);
        }
    }
    for (top_id, raidz) in raidz_storage.iter_mut() {
        vdevs.insert(*top_id, raidz as &mut dyn Vdev);
    }

    let device = vdevs
        .get_mut(&spec.vdev)
        .unwrap_or_else(|| panic!("no vdev with id {} in this config", spec.vdev));

    let raw_bytes = device
        .read(spec.offset, spec.psize)
        .unwrap_or_else(|_| panic!("failed to read {} bytes at offset {}", spec.psize, spec.offset));

    let bytes = if spec.decompress {
        zio::try_decompress_block(&raw_bytes, CompressionMethod::Lz4, spec.lsize)
            .expect("decompression failed")
    } else {
        raw_bytes
    };

    if spec.checksum {
        println!(
            "{CYAN}checksum{WHITE}: {}",
            fletcher::format_checksum(&fletcher::do_fletcher4(&bytes))
        );
    }

    if spec.interpret_as_bp_array {
        let entry_size = BlockPointer::get_ondisk_size();
        for (i, chunk) in bytes.chunks(entry_size).enumerate() {
            if chunk.len() < entry_size {
                break;
            }
            match BlockPointer::from_bytes_le(&mut chunk.iter().copied()) {
                Some(bp) => println!("{MAGENTA}bp[{i}]{WHITE}: {bp:?}"),
                None => println!("{YELLOW}bp[{i}]{WHITE}: unreadable (likely a hole)"),
            }
        }
    }

    if spec.raw {
        if std::io::stdout().is_terminal() {
            eprintln!("{RED}Fatal{WHITE}: refusing to write raw bytes to a terminal");
            std::process::exit(1);
        }
        use std::io::Write;
        std::io::stdout().write_all(&bytes).unwrap();
    }
}
