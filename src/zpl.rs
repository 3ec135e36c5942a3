use std::collections::HashMap;

use log::warn;

use crate::{
    byte_iter::ByteIter,
    dmu::{DNode, ObjSet},
    error::{Result, ZfsError},
    zap,
    zio::Vdevs,
    zpl,
};
use std::fmt::Debug;

// https://github.com/openzfs/zfs/blob/master/module/zfs/sa.c#L49

#[derive(Debug)]
pub struct SystemAttributesRegistration {
    attribute_id: u16,
    bswap: u8,
    len: u16,
}

impl SystemAttributesRegistration {
    pub fn from_value(value: u64) -> SystemAttributesRegistration {
        SystemAttributesRegistration {
            attribute_id: ((value >> 0) & 0xFFFF) as u16,
            bswap: ((value >> 16) & 0xFF) as u8,
            len: ((value >> 24) & 0xFFFF) as u16,
        }
    }
}

#[derive(Debug)]
pub struct SystemAttributesHeader {
    layout_id: u16,
    lengths: Vec<u16>,
}

pub const SYSTEM_ATTRIBUTES_MAGIC: u32 = 0x2F505A;

impl SystemAttributesHeader {
    pub fn get_ondisk_size(&self) -> usize {
        core::mem::size_of::<u32>()
            + core::mem::size_of::<u16>()
            + self.lengths.len() * core::mem::size_of::<u16>()
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<SystemAttributesHeader> {
        let magic = data.read_u32_le()?;
        if magic != SYSTEM_ATTRIBUTES_MAGIC {
            warn!("tried to parse a system attributes header with invalid magic");
            return None;
        }

        let layout_info = data.read_u16_le()?;
        let mut header_size = (layout_info >> 10) & 0b1111_11;
        header_size *= 8;

        if header_size == 0 {
            warn!("tried to parse a system attributes header with invalid size");
            return None;
        }

        let layout_id = (layout_info >> 0) & 0b11_1111_1111;
        let mut nlengths =
            usize::from(header_size) - (core::mem::size_of::<u32>() + core::mem::size_of::<u16>());
        nlengths /= core::mem::size_of::<u16>();
        let mut lengths = Vec::new();
        for _ in 0..nlengths {
            lengths.push(data.read_u16_le()?);
        }
        Some(SystemAttributesHeader { layout_id, lengths })
    }
}

#[derive(Clone, PartialEq)]
pub enum Value {
    U64(u64),
    U64Array(Vec<u64>),
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U64(arg0) => write!(f, "{:?}", arg0),
            Self::U64Array(arg0) => write!(f, "{:?}", arg0),
        }
    }
}

pub struct SystemAttribute {
    name: String,
    byteswap_function: u8,
    len: u16,
}

impl Debug for SystemAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{\"{}\", bswap: {}, len: {}}}",
            self.name, self.byteswap_function, self.len
        )
    }
}

#[derive(Debug)]
pub struct SystemAttributes {
    layouts: HashMap<usize, Vec<u16>>,
    attributes: HashMap<u16, SystemAttribute>,
}

impl SystemAttributes {
    pub fn from_attributes_node_number(
        system_attributes_info_number: usize,
        dataset_object_set: &mut ObjSet,
        vdevs: &mut Vdevs,
    ) -> Result<SystemAttributes> {
        let sa_info_node = dataset_object_set
            .get_dnode_at(system_attributes_info_number, vdevs)
            .ok_or_else(|| ZfsError::NotFound("system attributes master node".into()))?;
        let DNode::SystemAttributesMasterNode(mut sa_info) = sa_info_node else {
            return Err(ZfsError::MalformedInput(
                "system attributes master node is of the wrong dnode type".into(),
            ));
        };

        let sa_info_zap_data = sa_info.dump_zap_contents(vdevs)?;

        let mut system_attributes_layouts_zap_data = {
            let layouts_number = match sa_info_zap_data.get("LAYOUTS") {
                Some(zap::Value::U64(n)) => *n,
                _ => {
                    return Err(ZfsError::MalformedInput(
                        "system attributes layouts node number missing or of the wrong type".into(),
                    ))
                }
            };

            let layouts_node = dataset_object_set
                .get_dnode_at(layouts_number as usize, vdevs)
                .ok_or_else(|| ZfsError::NotFound("system attributes layouts node".into()))?;
            let DNode::SystemAttributesLayouts(mut system_attributes_layouts) = layouts_node else {
                return Err(ZfsError::MalformedInput(
                    "system attributes layouts node is of the wrong dnode type".into(),
                ));
            };

            let mut layouts = HashMap::new();
            for (key, value) in system_attributes_layouts.dump_zap_contents(vdevs)? {
                let zap::Value::U16Array(value) = value else {
                    return Err(ZfsError::MalformedInput(format!(
                        "layout \"{key}\" is not a u16 array in the zap data"
                    )));
                };
                let layout_id: usize = key
                    .parse()
                    .map_err(|_| ZfsError::MalformedInput(format!("layout key \"{key}\" is not a number")))?;
                layouts.insert(layout_id, value);
            }
            layouts
        };

        // Legacy layout, always present implicitly.
        system_attributes_layouts_zap_data.insert(
            0,
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
        );

        let system_attributes_registrations = {
            let registrations_number = match sa_info_zap_data.get("REGISTRY") {
                Some(zap::Value::U64(n)) => *n,
                _ => {
                    return Err(ZfsError::MalformedInput(
                        "system attributes registrations node number missing or of the wrong type".into(),
                    ))
                }
            };

            let registrations_node = dataset_object_set
                .get_dnode_at(registrations_number as usize, vdevs)
                .ok_or_else(|| ZfsError::NotFound("system attributes registrations node".into()))?;
            let DNode::SystemAttributesRegistrations(mut system_attributes_registrations) = registrations_node
            else {
                return Err(ZfsError::MalformedInput(
                    "system attributes registrations node is of the wrong dnode type".into(),
                ));
            };

            let mut registrations = HashMap::new();
            for (key, value) in system_attributes_registrations.dump_zap_contents(vdevs)? {
                let zap::Value::U64(val) = value else {
                    return Err(ZfsError::MalformedInput(format!(
                        "system attributes registration \"{key}\" is invalid"
                    )));
                };
                let registration = zpl::SystemAttributesRegistration::from_value(val);
                registrations.insert(
                    registration.attribute_id,
                    SystemAttribute {
                        name: key,
                        byteswap_function: registration.bswap,
                        len: registration.len,
                    },
                );
            }
            registrations
        };

        Ok(SystemAttributes {
            layouts: system_attributes_layouts_zap_data,
            attributes: system_attributes_registrations,
        })
    }

    pub fn parse_system_attributes_bytes_le(
        &mut self,
        data: &mut impl Iterator<Item = u8>,
    ) -> Result<HashMap<String, Value>> {
        let system_attributes_header = zpl::SystemAttributesHeader::from_bytes_le(data)
            .ok_or_else(|| ZfsError::MalformedInput("invalid system attributes header".into()))?;
        let layout = self
            .layouts
            .get(&usize::from(system_attributes_header.layout_id))
            .ok_or_else(|| {
                ZfsError::NotFound(format!(
                    "system attributes layout {}",
                    system_attributes_header.layout_id
                ))
            })?;
        let mut attributes: HashMap<String, Value> = HashMap::new();

        // Attributes registered with len == 0 are variable-length; their real
        // length for this znode comes from the header's override table, in
        // the order such attributes appear in the layout.
        let mut length_overrides = system_attributes_header.lengths.iter().copied();

        for attribute_id in layout.iter() {
            let attribute_info = self.attributes.get(attribute_id).ok_or_else(|| {
                ZfsError::NotFound(format!("system attributes registration {attribute_id}"))
            })?;
            let attribute_len = if attribute_info.len == 0 {
                length_overrides.next().ok_or_else(|| {
                    ZfsError::MalformedInput(format!(
                        "system attribute \"{}\" is variable-length but the header has no length override for it",
                        attribute_info.name
                    ))
                })?
            } else {
                attribute_info.len
            };

            match attribute_info.name.as_str() {
                // All of these are u64 array or single u64 system attributes with known sizes
                // Source: https://github.com/openzfs/zfs/blob/master/module/zfs/zfs_sa.c#L34
                "ZPL_ATIME" | "ZPL_MTIME" | "ZPL_CTIME" | "ZPL_CRTIME" | "ZPL_GEN" | "ZPL_MODE"
                | "ZPL_SIZE" | "ZPL_PARENT" | "ZPL_LINKS" | "ZPL_XATTR" | "ZPL_RDEV"
                | "ZPL_FLAGS" | "ZPL_UID" | "ZPL_GID" | "ZPL_PAD" | "ZPL_DACL_COUNT"
                | "ZPL_PROJID" => {
                    if attribute_info.len == 0 {
                        return Err(ZfsError::MalformedInput(format!(
                            "system attribute \"{}\" is documented as fixed-size but was read with a variable size",
                            attribute_info.name
                        )));
                    }
                    if attribute_info.byteswap_function != 0 {
                        warn!(
                            "unsupported byte swap function on attribute \"{}\", skipping",
                            attribute_info.name
                        );
                        data.skip_n_bytes(attribute_len as usize).ok_or_else(|| {
                            ZfsError::MalformedInput("ran out of data skipping attribute".into())
                        })?;
                        continue;
                    }

                    let nvalues = attribute_len / 8;
                    if nvalues == 1 {
                        let attribute_value = data
                            .read_u64_le()
                            .ok_or_else(|| ZfsError::MalformedInput("truncated attribute value".into()))?;
                        attributes.insert(attribute_info.name.clone(), Value::U64(attribute_value));
                    } else {
                        let mut attribute_values = Vec::<u64>::new();
                        for _ in 0..nvalues {
                            attribute_values.push(data.read_u64_le().ok_or_else(|| {
                                ZfsError::MalformedInput("truncated attribute array value".into())
                            })?);
                        }
                        attributes.insert(attribute_info.name.clone(), Value::U64Array(attribute_values));
                    }
                }

                _ => {
                    warn!("unsupported system attribute \"{}\", skipping", attribute_info.name);
                    data.skip_n_bytes(attribute_len as usize).ok_or_else(|| {
                        ZfsError::MalformedInput("ran out of data skipping attribute".into())
                    })?;
                }
            }
        }

        Ok(attributes)
    }
}
