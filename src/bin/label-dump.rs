//! `label-dump --dev <path>... --dump {nvlist|uberblock}`
//!
//! Reads the first on-disk label of each device named on the command line
//! and either prints its NV-list configuration as JSON or lists the
//! non-empty uberblocks found in the first device's label.

use std::fs::OpenOptions;

use szfs::ansi_color::*;
use szfs::{nvlist, byte_iter::FromBytes, Uberblock, Vdev, VdevFile, VdevLabel};

fn nvlist_value_to_json(value: &nvlist::Value) -> serde_json::Value {
    use nvlist::Value::*;
    match value {
        Unknown => serde_json::Value::Null,
        Boolean(b) | BooleanValue(b) => serde_json::Value::Bool(*b),
        Byte(v) => serde_json::json!(v),
        I16(v) => serde_json::json!(v),
        U16(v) => serde_json::json!(v),
        I32(v) => serde_json::json!(v),
        U32(v) => serde_json::json!(v),
        I64(v) => serde_json::json!(v),
        U64(v) => serde_json::json!(v),
        I8(v) => serde_json::json!(v),
        U8(v) => serde_json::json!(v),
        HRTime(v) => serde_json::json!(v),
        String(s) => serde_json::json!(s),
        NVList(list) => nvlist_to_json(list),
        ByteArray(arr) => serde_json::json!(arr),
        U8Array(arr) => serde_json::json!(arr),
        I8Array(arr) => serde_json::json!(arr),
        BooleanArray(arr) => serde_json::json!(arr),
        I16Array(arr) => serde_json::json!(arr),
        U16Array(arr) => serde_json::json!(arr),
        I32Array(arr) => serde_json::json!(arr),
        U32Array(arr) => serde_json::json!(arr),
        I64Array(arr) => serde_json::json!(arr),
        U64Array(arr) => serde_json::json!(arr),
        StringArray(arr) => serde_json::json!(arr),
        NVListArray(arr) => serde_json::Value::Array(arr.iter().map(nvlist_to_json).collect()),
    }
}

fn nvlist_to_json(list: &nvlist::NVList) -> serde_json::Value {
    serde_json::Value::Object(
        list.iter()
            .map(|(k, v)| (k.clone(), nvlist_value_to_json(v)))
            .collect(),
    )
}

fn parse_args() -> (Vec<String>, String) {
    let mut devices = Vec::new();
    let mut dump = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dev" => devices.push(args.next().expect("--dev requires a path")),
            "--dump" => dump = Some(args.next().expect("--dump requires nvlist or uberblock")),
            other => panic!("unrecognised argument {other}"),
        }
    }

    (devices, dump.expect("--dump is required"))
}

fn main() {
    szfs::logging::init_from_env();

    let (device_paths, dump) = parse_args();
    if device_paths.is_empty() {
        eprintln!("{RED}Fatal{WHITE}: at least one --dev is required");
        std::process::exit(1);
    }

    let mut devices: Vec<VdevFile> = device_paths
        .iter()
        .map(|path| {
            let file = OpenOptions::new()
                .read(true)
                .write(false)
                .open(path)
                .unwrap_or_else(|e| {
                    eprintln!("{RED}Fatal{WHITE}: failed to open {path}: {e}");
                    std::process::exit(1);
                });
            VdevFile::from(file)
        })
        .collect();

    match dump.as_str() {
        "nvlist" => {
            for (path, device) in device_paths.iter().zip(devices.iter_mut()) {
                let raw_label = device
                    .read_raw_label(0)
                    .expect("label 0 should be readable");
                let label = VdevLabel::from_bytes(&raw_label);
                let nv_list = nvlist::from_bytes_xdr(
                    &mut label.get_name_value_pairs_raw().iter().copied(),
                )
                .expect("label nv-list should be valid");
                println!(
                    "{CYAN}{path}{WHITE}: {}",
                    serde_json::to_string_pretty(&nvlist_to_json(&nv_list)).unwrap()
                );
            }
        }
        "uberblock" => {
            let device = &mut devices[0];
            let raw_label = device
                .read_raw_label(0)
                .expect("label 0 should be readable");
            let mut label = VdevLabel::from_bytes(&raw_label);
            let nv_list = nvlist::from_bytes_xdr(
                &mut label.get_name_value_pairs_raw().iter().copied(),
            )
            .expect("label nv-list should be valid");
            let nvlist::Value::NVList(vdev_tree) = &nv_list["vdev_tree"] else {
                panic!("vdev_tree is not an nvlist");
            };
            let nvlist::Value::U64(ashift) = vdev_tree["ashift"] else {
                panic!("no ashift found for top level vdev");
            };
            label.set_raw_uberblock_size(2usize.pow(ashift as u32));

            for i in 0..label.get_raw_uberblock_count() {
                let raw = label.get_raw_uberblock(i);
                if let Some(uberblock) = Uberblock::from_bytes(&mut raw.iter().copied()) {
                    println!("{MAGENTA}uberblock[{i}]{WHITE}: {uberblock:?}");
                }
            }
        }
        other => {
            eprintln!("{RED}Fatal{WHITE}: unknown --dump mode {other}, expected nvlist or uberblock");
            std::process::exit(1);
        }
    }
}
