//! `object-dump --config <vdev.json> --obj_id <n> [--raw]`
//!
//! Walks from the pool's active uberblock down to the root dataset's object
//! set (the same path `fs-walker` in the original corpus took by hand) and
//! either enumerates every allocated object (`--obj_id 0`) or dumps one
//! object's decoded contents or raw bytes.

use std::collections::HashMap;
use std::io::IsTerminal;

use szfs::{
    ansi_color::*, byte_iter::FromBytes, config::PoolConfig, dmu, dmu::DNode, nvlist, pool,
    zap, zio::Vdevs, Uberblock, Vdev, VdevFile, VdevLabel, VdevRaidz,
};

struct Args {
    config_path: String,
    obj_id: usize,
    raw: bool,
}

fn parse_args() -> Args {
    let mut config_path = None;
    let mut obj_id = None;
    let mut raw = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().expect("--config requires a path")),
            "--obj_id" => {
                obj_id = Some(
                    args.next()
                        .expect("--obj_id requires a number")
                        .parse()
                        .expect("--obj_id must be a non-negative integer"),
                )
            }
            "--raw" => raw = true,
            other => panic!("unrecognised argument {other}"),
        }
    }

    Args {
        config_path: config_path.expect("--config is required"),
        obj_id: obj_id.expect("--obj_id is required"),
        raw,
    }
}

fn dnode_into_base(dnode: DNode) -> dmu::DNodeBase {
    match dnode {
        DNode::ObjectDirectory(d) => d.0,
        DNode::DSLDirectory(d) => d.0,
        DNode::DSLDataset(d) => d.0,
        DNode::MasterNode(d) => d.0,
        DNode::DirectoryContents(d) => d.0,
        DNode::DeleteQueue(d) => d.0,
        DNode::PlainFileContents(d) => d.0,
        DNode::Bpobj(d) => d.0,
        DNode::SystemAttributesMasterNode(d) => d.0,
        DNode::SystemAttributesLayouts(d) => d.0,
        DNode::SystemAttributesRegistrations(d) => d.0,
        DNode::Unsupported(d) => d,
    }
}

fn describe(dnode: &DNode) -> &'static str {
    match dnode {
        DNode::ObjectDirectory(_) => "object directory",
        DNode::DSLDirectory(_) => "DSL directory",
        DNode::DSLDataset(_) => "DSL dataset",
        DNode::MasterNode(_) => "master node",
        DNode::DirectoryContents(_) => "directory contents (ZAP)",
        DNode::DeleteQueue(_) => "delete queue (ZAP)",
        DNode::PlainFileContents(_) => "plain file contents",
        DNode::Bpobj(_) => "bpobj",
        DNode::SystemAttributesMasterNode(_) => "system attributes master node",
        DNode::SystemAttributesLayouts(_) => "system attributes layouts",
        DNode::SystemAttributesRegistrations(_) => "system attributes registrations",
        DNode::Unsupported(_) => "unsupported",
    }
}

fn dump_typed(dnode: DNode, vdevs: &mut Vdevs) {
    match dnode {
        DNode::ObjectDirectory(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::MasterNode(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::DirectoryContents(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::DeleteQueue(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::SystemAttributesMasterNode(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::SystemAttributesLayouts(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::SystemAttributesRegistrations(mut d) => println!("{:?}", d.dump_zap_contents(vdevs)),
        DNode::DSLDirectory(d) => println!("{:?}", d.parse_bonus_data()),
        DNode::DSLDataset(d) => println!("{:?}", d.parse_bonus_data()),
        DNode::Bpobj(d) => println!("{:?}", d.parse_header()),
        DNode::PlainFileContents(d) => {
            println!("plain file contents, logical size {} bytes", d.0.get_data_size())
        }
        DNode::Unsupported(d) => println!("{YELLOW}unsupported{WHITE}: {d:?}"),
    }
}

fn main() {
    szfs::logging::init_from_env();
    let args = parse_args();

    let config_file = std::fs::File::open(&args.config_path)
        .unwrap_or_else(|e| panic!("failed to open config {}: {e}", args.config_path));
    let config: PoolConfig = serde_json::from_reader(config_file).expect("invalid vdev config");

    let mut topology = pool::open_topology(&config).expect("failed to open backing devices");
    let mut leaf_refs: Vec<Option<&mut VdevFile>> =
        topology.leaves.iter_mut().map(Some).collect();

    let mut raidz_storage: Vec<(usize, VdevRaidz)> = Vec::with_capacity(topology.tops.len());
    for (top_id, kind) in &topology.tops {
        if let pool::TopKind::Raidz {
            ashift,
            nparity,
            leaf_indices,
        } = kind
        {
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

    let first_top_id = topology.tops.first().map(|(id, _)| *id).expect("at least one top-level vdev");
    let mut label = {
        let device = vdevs.get_mut(&first_top_id).expect("first top-level vdev should be present");
        VdevLabel::from_bytes(&device.read_raw_label(0).expect("label 0 should be readable"))
    };
    let nv_list = nvlist::from_bytes_xdr(&mut label.get_name_value_pairs_raw().iter().copied())
        .expect("label nv-list should be valid");
    let nvlist::Value::NVList(vdev_tree) = &nv_list["vdev_tree"] else {
        panic!("vdev_tree is not an nvlist");
    };
    let nvlist::Value::U64(ashift) = vdev_tree["ashift"] else {
        panic!("no ashift found for top level vdev");
    };
    label.set_raw_uberblock_size(2usize.pow(ashift as u32));

    let mut uberblocks = Vec::new();
    for i in 0..label.get_raw_uberblock_count() {
        if let Some(ub) = Uberblock::from_bytes(&mut label.get_raw_uberblock(i).iter().copied()) {
            uberblocks.push(ub);
        }
    }
    uberblocks.sort_unstable_by_key(|ub| ub.txg);

    let mut mos_data = None;
    for ub in uberblocks.iter_mut().rev() {
        if let Ok(data) = ub.rootbp.dereference(&mut vdevs) {
            mos_data = Some(data);
            break;
        }
    }
    let mos_data = mos_data.expect("no uberblock's root block pointer could be dereferenced");

    let mut mos = dmu::ObjSet::from_bytes_le(&mut mos_data.iter().copied())
        .expect("meta object set should be valid");

    let DNode::ObjectDirectory(mut object_directory) = mos
        .get_dnode_at(1, &mut vdevs)
        .expect("dnode 1 should be the MOS object directory")
    else {
        panic!("dnode 1 is not an object directory");
    };
    let objdir = object_directory.dump_zap_contents(&mut vdevs).unwrap();

    let zap::Value::U64(root_dataset_number) = objdir["root_dataset"] else {
        panic!("root_dataset entry is not a number");
    };

    let DNode::DSLDirectory(root_dataset) = mos
        .get_dnode_at(root_dataset_number as usize, &mut vdevs)
        .unwrap()
    else {
        panic!("root_dataset is not a DSL directory");
    };
    let head_dataset_number = root_dataset
        .parse_bonus_data()
        .unwrap()
        .get_head_dataset_object_number();

    let DNode::DSLDataset(head_dataset) = mos
        .get_dnode_at(head_dataset_number as usize, &mut vdevs)
        .unwrap()
    else {
        panic!("head dataset is not a DSL dataset");
    };
    let mut head_dataset_bonus = head_dataset.parse_bonus_data().unwrap();
    let head_dataset_block_pointer = head_dataset_bonus.get_block_pointer();

    let mut dataset_object_set = dmu::ObjSet::from_bytes_le(
        &mut head_dataset_block_pointer
            .dereference(&mut vdevs)
            .unwrap()
            .iter()
            .copied(),
    )
    .expect("head dataset object set should be valid");

    if args.obj_id == 0 {
        let count = dataset_object_set.object_count();
        println!("{CYAN}Info{WHITE}: enumerating {count} candidate object ids");
        for id in 1..count {
            if let Some(dnode) = dataset_object_set.get_dnode_at(id, &mut vdevs) {
                println!("{id}: {}", describe(&dnode));
            }
        }
        return;
    }

    let dnode = dataset_object_set
        .get_dnode_at(args.obj_id, &mut vdevs)
        .unwrap_or_else(|| panic!("object {} does not exist or failed to decode", args.obj_id));

    if args.raw {
        if std::io::stdout().is_terminal() {
            eprintln!("{RED}Fatal{WHITE}: refusing to write raw bytes to a terminal");
            std::process::exit(1);
        }
        let mut base = dnode_into_base(dnode);
        let size = base.get_data_size();
        let data = base.read(0, size, &mut vdevs).expect("failed to read object data");
        use std::io::Write;
        std::io::stdout().write_all(&data).unwrap();
    } else {
        dump_typed(dnode, &mut vdevs);
    }
}
