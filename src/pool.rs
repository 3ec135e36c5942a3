//! Opens the backing files named by a [`crate::config::PoolConfig`] and
//! records enough bookkeeping for a binary's `main()` to assemble the
//! `Vdevs` map itself (the final assembly needs disjoint `&mut` borrows
//! into the opened files and so can't cross a function boundary cleanly;
//! see `label-dump`/`object-dump`/`blkptr-dump` for the assembly step).

use std::fs::OpenOptions;

use crate::{config::PoolConfig, config::VdevType, VdevFile};

pub enum TopKind {
    Leaf { leaf_index: usize },
    Raidz {
        ashift: u32,
        nparity: usize,
        leaf_indices: Vec<usize>,
    },
}

pub struct Topology {
    pub leaves: Vec<VdevFile>,
    pub tops: Vec<(usize, TopKind)>,
}

pub fn open_topology(config: &PoolConfig) -> std::io::Result<Topology> {
    let mut leaves = Vec::new();
    let mut tops = Vec::new();

    for entry in &config.vdevs {
        let tree = &entry.vdev_tree;
        match tree.vdev_type {
            VdevType::File | VdevType::Disk => {
                let path = tree
                    .path
                    .as_ref()
                    .expect("leaf top-level vdev must have a path");
                let file = OpenOptions::new().read(true).write(false).open(path)?;
                let leaf_index = leaves.len();
                leaves.push(VdevFile::from(file));
                tops.push((tree.id, TopKind::Leaf { leaf_index }));
            }
            VdevType::Raidz => {
                let mut leaf_indices = Vec::with_capacity(tree.children.len());
                for child in &tree.children {
                    let file = OpenOptions::new()
                        .read(true)
                        .write(false)
                        .open(&child.path)?;
                    leaf_indices.push(leaves.len());
                    leaves.push(VdevFile::from(file));
                }
                tops.push((
                    tree.id,
                    TopKind::Raidz {
                        ashift: tree.ashift.expect("raidz vdev must specify ashift"),
                        nparity: tree.nparity.expect("raidz vdev must specify nparity"),
                        leaf_indices,
                    },
                ));
            }
        }
    }

    Ok(Topology { leaves, tops })
}
