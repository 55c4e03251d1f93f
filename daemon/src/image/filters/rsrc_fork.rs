//! Apple resource fork readers.
//!
//! DMG images describe their block map either as an XML property list or as
//! a classic binary resource fork; NDIF images always use the binary form.
//! Both readers produce the same in-memory representation. All multi-byte
//! fields in the binary form are big-endian.

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::image::ImageError;

/// One resource reference: id, attributes, optional name and payload
#[derive(Debug, Default, Clone)]
pub struct RsrcRef {
    pub id: i16,
    pub attrs: u8,
    pub name: String,
    pub data: Vec<u8>,
}

/// All references of one four-character resource type
#[derive(Debug, Clone)]
pub struct RsrcType {
    pub type_code: [u8; 4],
    pub refs: Vec<RsrcRef>,
}

/// A parsed resource fork
#[derive(Debug, Default, Clone)]
pub struct RsrcFork {
    pub types: Vec<RsrcType>,
}

impl RsrcFork {
    pub fn find_type(&self, type_code: &[u8; 4]) -> Option<&RsrcType> {
        self.types.iter().find(|t| &t.type_code == type_code)
    }

    pub fn find_ref(&self, type_code: &[u8; 4], id: i16) -> Option<&RsrcRef> {
        self.find_type(type_code)?.refs.iter().find(|r| r.id == id)
    }

    // ------------------------------------------------------------------
    // XML property list form
    // ------------------------------------------------------------------

    /// Parse the XML `<plist>` form. The expected shape is
    /// `plist > dict > key("resource-fork") > dict > key(type) > array >
    /// dict(ref fields)`; nesting depth selects what a key or value means.
    pub fn read_xml(xml: &[u8]) -> Result<Self, ImageError> {
        let mut reader = Reader::from_reader(xml);

        let mut fork = RsrcFork::default();
        let mut depth = 0usize;
        let mut in_key = false;
        let mut in_string = false;
        let mut in_data = false;
        let mut last_key = String::new();

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    match e.name().as_ref() {
                        b"key" => in_key = true,
                        b"string" => in_string = true,
                        b"data" => in_data = true,
                        b"dict" if depth == 5 => {
                            // New resource reference under the current type
                            if let Some(rsrc_type) = fork.types.last_mut() {
                                rsrc_type.refs.push(RsrcRef::default());
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(e)) => {
                    match e.name().as_ref() {
                        b"key" => in_key = false,
                        b"string" => in_string = false,
                        b"data" => in_data = false,
                        _ => {}
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Text(text)) => {
                    let text = text.into_inner();
                    if in_key {
                        last_key = String::from_utf8_lossy(&text).into_owned();
                        if depth == 4 && last_key != "resource-fork" {
                            // New resource type
                            let mut type_code = [b' '; 4];
                            for (dst, src) in type_code.iter_mut().zip(last_key.bytes()) {
                                *dst = src;
                            }
                            fork.types.push(RsrcType { type_code, refs: Vec::new() });
                        }
                    } else if in_string && depth == 6 {
                        let value = String::from_utf8_lossy(&text).into_owned();
                        if let Some(rsrc_ref) =
                            fork.types.last_mut().and_then(|t| t.refs.last_mut())
                        {
                            match last_key.as_str() {
                                "Attributes" => {
                                    let trimmed = value.trim_start_matches("0x");
                                    rsrc_ref.attrs =
                                        u8::from_str_radix(trimmed, 16).unwrap_or(0);
                                }
                                "ID" => rsrc_ref.id = value.trim().parse().unwrap_or(0),
                                "Name" | "CFName" => {
                                    if rsrc_ref.name.is_empty() {
                                        rsrc_ref.name = value;
                                    }
                                }
                                _ => {}
                            }
                        }
                    } else if in_data && depth == 6 {
                        if let Some(rsrc_ref) =
                            fork.types.last_mut().and_then(|t| t.refs.last_mut())
                        {
                            rsrc_ref.data = decode_plist_data(&text)?;
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ImageError::Malformed(format!("plist parse error: {e}")));
                }
            }
            buf.clear();
        }

        Ok(fork)
    }

    // ------------------------------------------------------------------
    // Classic binary form
    // ------------------------------------------------------------------

    /// Parse the classic binary resource fork
    pub fn read_binary(data: &[u8]) -> Result<Self, ImageError> {
        if data.len() < 16 {
            return Err(ImageError::Malformed("resource fork too short".to_string()));
        }

        let data_offset = read_u32(data, 0)? as usize;
        let map_offset = read_u32(data, 4)? as usize;

        // Map: header copy (16), handle (4), file ref (2), attrs (2)
        let type_list_offset = read_u16(data, map_offset + 24)? as usize;
        let name_list_offset = read_u16(data, map_offset + 26)? as usize;
        let num_types = read_u16(data, map_offset + 28)? as i16 as i32 + 1;

        let mut fork = RsrcFork::default();

        for t in 0..num_types.max(0) as usize {
            let type_pos = map_offset + type_list_offset + 2 + 8 * t;
            let mut type_code = [0u8; 4];
            type_code.copy_from_slice(
                data.get(type_pos..type_pos + 4)
                    .ok_or_else(|| ImageError::Malformed("type list truncated".to_string()))?,
            );
            let num_refs = read_u16(data, type_pos + 4)? as i16 as i32 + 1;
            let ref_offset = read_u16(data, type_pos + 6)? as usize;

            let mut refs = Vec::new();
            for r in 0..num_refs.max(0) as usize {
                let ref_pos = map_offset + type_list_offset + ref_offset + 12 * r;
                let id = read_u16(data, ref_pos)? as i16;
                let name_offset = read_u16(data, ref_pos + 2)? as i16;
                let attrs = data[ref_pos + 4];
                let rsrc_data_offset = ((data[ref_pos + 5] as usize) << 16)
                    | ((data[ref_pos + 6] as usize) << 8)
                    | data[ref_pos + 7] as usize;

                let name = if name_offset >= 0 {
                    let name_pos = map_offset + name_list_offset + name_offset as usize;
                    let len = *data.get(name_pos).unwrap_or(&0) as usize;
                    data.get(name_pos + 1..name_pos + 1 + len)
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        .unwrap_or_default()
                } else {
                    String::new()
                };

                let data_pos = data_offset + rsrc_data_offset;
                let data_len = read_u32(data, data_pos)? as usize;
                let payload = data
                    .get(data_pos + 4..data_pos + 4 + data_len)
                    .ok_or_else(|| ImageError::Malformed("resource data truncated".to_string()))?
                    .to_vec();

                refs.push(RsrcRef { id, attrs, name, data: payload });
            }

            fork.types.push(RsrcType { type_code, refs });
        }

        Ok(fork)
    }
}

/// Strip whitespace from a `<data>` payload and decode its base64 content
fn decode_plist_data(text: &[u8]) -> Result<Vec<u8>, ImageError> {
    let stripped: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !matches!(b, b'\n' | b'\r' | b'\t' | b' '))
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(&stripped)
        .map_err(|e| ImageError::Malformed(format!("bad base64 in plist data: {e}")))
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, ImageError> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| ImageError::Malformed("resource fork truncated".to_string()))
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32, ImageError> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ImageError::Malformed("resource fork truncated".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>resource-fork</key>
    <dict>
        <key>blkx</key>
        <array>
            <dict>
                <key>Attributes</key>
                <string>0x0050</string>
                <key>ID</key>
                <string>0</string>
                <key>Name</key>
                <string>whole disk</string>
                <key>Data</key>
                <data>
                AAECAw==
                </data>
            </dict>
        </array>
    </dict>
</dict>
</plist>"#;

    #[test]
    fn test_xml_fork_parses_blkx() {
        let fork = RsrcFork::read_xml(PLIST.as_bytes()).unwrap();
        let blkx = fork.find_type(b"blkx").unwrap();
        assert_eq!(blkx.refs.len(), 1);

        let r = &blkx.refs[0];
        assert_eq!(r.id, 0);
        assert_eq!(r.attrs, 0x50);
        assert_eq!(r.name, "whole disk");
        assert_eq!(r.data, vec![0, 1, 2, 3]);
    }

    fn build_binary_fork(payload: &[u8]) -> Vec<u8> {
        // header(16) + data section + map
        let data_offset = 16u32;
        let data_section_len = 4 + payload.len();
        let map_offset = 16 + data_section_len as u32;

        let mut out = Vec::new();
        out.extend_from_slice(&data_offset.to_be_bytes());
        out.extend_from_slice(&map_offset.to_be_bytes());
        out.extend_from_slice(&(data_section_len as u32).to_be_bytes());
        out.extend_from_slice(&58u32.to_be_bytes()); // map length

        // data section: length-prefixed payload
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);

        // map: header copy + handle + file ref + attrs
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&28u16.to_be_bytes()); // type list offset
        out.extend_from_slice(&50u16.to_be_bytes()); // name list offset
        out.extend_from_slice(&0u16.to_be_bytes()); // num types - 1

        // type list: 2 reserved bytes then one 8-byte entry
        out.extend_from_slice(b"bcem");
        out.extend_from_slice(&0u16.to_be_bytes()); // num refs - 1
        out.extend_from_slice(&10u16.to_be_bytes()); // ref offset

        // ref entry at map + type_list_offset + ref_offset
        out.extend_from_slice(&128u16.to_be_bytes()); // id
        out.extend_from_slice(&0u16.to_be_bytes()); // name offset 0
        out.push(0); // attrs
        out.extend_from_slice(&[0, 0, 0]); // data offset
        out.extend_from_slice(&[0u8; 4]); // handle

        // name list: pascal string
        out.push(4);
        out.extend_from_slice(b"disk");

        out
    }

    #[test]
    fn test_binary_fork_parses() {
        let raw = build_binary_fork(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let fork = RsrcFork::read_binary(&raw).unwrap();
        let r = fork.find_ref(b"bcem", 128).unwrap();
        assert_eq!(r.name, "disk");
        assert_eq!(r.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_binary_fork_truncated() {
        let raw = build_binary_fork(&[1, 2, 3]);
        assert!(RsrcFork::read_binary(&raw[..20]).is_err());
    }
}
