//! On-disk JSON shape for the vdev topology a CLI binary is pointed at.
//!
//! This is the only external configuration surface (see SPEC_FULL.md §6a);
//! it is loaded once via `serde_json::from_reader` and never written back.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub vdevs: Vec<TopLevelVdevEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TopLevelVdevEntry {
    pub vdev_tree: VdevTree,
}

#[derive(Debug, Deserialize)]
pub struct VdevTree {
    pub id: usize,
    pub guid: Option<u64>,
    #[serde(rename = "type")]
    pub vdev_type: VdevType,
    pub ashift: Option<u32>,
    pub nparity: Option<usize>,
    pub path: Option<String>,
    #[serde(default)]
    pub children: Vec<VdevChild>,
}

#[derive(Debug, Deserialize)]
pub struct VdevChild {
    pub id: usize,
    #[serde(rename = "type")]
    pub vdev_type: VdevType,
    pub path: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum VdevType {
    Raidz,
    File,
    Disk,
}
