use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::sm64::EmulatorVariant;

/// The only requirement string the current patch sets declare: the patch
/// writes above the 4MB boundary and needs the expanded RAM the newer
/// emulator build maps.
pub const REQUIREMENT_EXTENDED_RAM: &str = "extended-ram";

/// Word size the patch author generated the payload with. Payloads are
/// byte-swapped at this granularity before writing.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum ByteOrder {
    #[serde(rename = "16")]
    Word16,
    #[serde(rename = "32")]
    Word32,
    #[serde(rename = "64")]
    Word64,
}

impl ByteOrder {
    fn width(self) -> usize {
        match self {
            Self::Word16 => 2,
            Self::Word32 => 4,
            Self::Word64 => 8,
        }
    }
}

/// Swaps the buffer's bytes within words of the given width. A trailing
/// partial word is left untouched. Applying the same swap twice restores
/// the original buffer.
pub fn swap_bytes(buffer: &mut [u8], order: ByteOrder) {
    for word in buffer.chunks_exact_mut(order.width()) {
        word.reverse();
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMetadata {
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
}

/// One payload file: the hex file name is the base-relative offset to
/// overwrite with the file's bytes.
pub struct PatchPayload {
    pub offset: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to list patch sets")]
    List(#[source] io::Error),
    #[error("failed to read metadata for patch set {0:?}")]
    Metadata(String, #[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("payload file name {0:?} is not a hexadecimal offset")]
    BadName(String),
    #[error("failed to read patch payload {}", .path.display())]
    Payload {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Patch-set storage: a directory per set, holding `metadata.json` and a
/// `payload/` directory of files named by hexadecimal offset.
pub struct PatchStore {
    root: PathBuf,
}

impl PatchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn list_sets(&self) -> Result<Vec<String>, PatchError> {
        let entries = fs::read_dir(&self.root).map_err(PatchError::List)?;
        let mut sets = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        sets.sort();
        Ok(sets)
    }

    pub fn metadata(&self, set: &str) -> Result<PatchMetadata, PatchError> {
        let path = self.root.join(set).join("metadata.json");
        let json = fs::read_to_string(&path)
            .map_err(|err| PatchError::Metadata(set.to_owned(), err.into()))?;
        serde_json::from_str(&json).map_err(|err| PatchError::Metadata(set.to_owned(), err.into()))
    }

    /// Reads every payload of the set. Any unreadable file or unparsable
    /// file name fails the whole load.
    pub fn load_set(&self, set: &str) -> Result<Vec<PatchPayload>, PatchError> {
        let payload_dir = self.root.join(set).join("payload");
        let entries = fs::read_dir(&payload_dir).map_err(|err| PatchError::Payload {
            path: payload_dir.clone(),
            source: err,
        })?;
        let mut payloads = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PatchError::Payload {
                path: payload_dir.clone(),
                source: err,
            })?;
            payloads.push(read_payload(&entry.path())?);
        }
        payloads.sort_by_key(|payload| payload.offset);
        Ok(payloads)
    }

    /// Which sets a patch run covers.
    ///
    /// An explicit request is intersected with the available sets by name
    /// and ignores requirements: a streamer asking for a set by name gets
    /// it. An unscoped run takes every set whose requirements the detected
    /// emulator variant supports.
    pub fn select_sets(
        &self,
        requested: Option<&[String]>,
        variant: EmulatorVariant,
    ) -> Result<Vec<String>, PatchError> {
        let available = self.list_sets()?;
        match requested {
            Some(names) => Ok(available
                .into_iter()
                .filter(|set| names.iter().any(|name| name == set))
                .collect()),
            None => {
                let mut selected = Vec::new();
                for set in available {
                    let metadata = self.metadata(&set)?;
                    if metadata
                        .requirements
                        .iter()
                        .all(|requirement| variant.supports(requirement))
                    {
                        selected.push(set);
                    }
                }
                Ok(selected)
            }
        }
    }
}

fn read_payload(path: &Path) -> Result<PatchPayload, PatchError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hex = name.trim_start_matches("0x");
    let offset =
        usize::from_str_radix(hex, 16).map_err(|_| PatchError::BadName(name.clone()))?;
    let data = fs::read(path).map_err(|err| PatchError::Payload {
        path: path.to_owned(),
        source: err,
    })?;
    Ok(PatchPayload { offset, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_patch_root;

    #[test]
    fn word_swap_is_its_own_inverse() {
        let original: Vec<u8> = (0..16).collect();
        for order in [ByteOrder::Word16, ByteOrder::Word32, ByteOrder::Word64] {
            let mut buffer = original.clone();
            swap_bytes(&mut buffer, order);
            assert_ne!(buffer, original);
            swap_bytes(&mut buffer, order);
            assert_eq!(buffer, original);
        }
    }

    #[test]
    fn swap32_reverses_each_word() {
        let mut buffer = *b"!healabc";
        swap_bytes(&mut buffer, ByteOrder::Word32);
        assert_eq!(&buffer, b"aeh!cbal");
    }

    #[test]
    fn trailing_partial_word_is_untouched() {
        let mut buffer = [1, 2, 3, 4, 5, 6];
        swap_bytes(&mut buffer, ByteOrder::Word32);
        assert_eq!(buffer, [4, 3, 2, 1, 5, 6]);
    }

    #[test]
    fn metadata_parses_requirements_and_byte_order() {
        let metadata: PatchMetadata =
            serde_json::from_str(r#"{"requirements":["extended-ram"],"byteOrder":"32"}"#).unwrap();
        assert_eq!(metadata.requirements, [REQUIREMENT_EXTENDED_RAM]);
        assert_eq!(metadata.byte_order, Some(ByteOrder::Word32));

        let metadata: PatchMetadata = serde_json::from_str("{}").unwrap();
        assert!(metadata.requirements.is_empty());
        assert_eq!(metadata.byte_order, None);
    }

    #[test]
    fn loads_hex_named_payloads() {
        let root = temp_patch_root();
        let store = PatchStore::new(&root);
        write_set(&root, "commands", "{}", &[("36f010", &[1, 2, 3, 4]), ("100", &[9])]);

        let payloads = store.load_set("commands").unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].offset, 0x100);
        assert_eq!(payloads[0].data, [9]);
        assert_eq!(payloads[1].offset, 0x36f010);
    }

    #[test]
    fn bad_payload_name_fails_the_load() {
        let root = temp_patch_root();
        let store = PatchStore::new(&root);
        write_set(&root, "broken", "{}", &[("not-hex", &[0])]);
        assert!(matches!(
            store.load_set("broken"),
            Err(PatchError::BadName(_))
        ));
    }

    #[test]
    fn unsupported_requirement_excluded_unless_requested() {
        let root = temp_patch_root();
        let store = PatchStore::new(&root);
        write_set(&root, "basic", "{}", &[("0", &[0])]);
        write_set(
            &root,
            "expanded",
            r#"{"requirements":["extended-ram"]}"#,
            &[("0", &[0])],
        );

        let unscoped = store
            .select_sets(None, EmulatorVariant::Version1_6)
            .unwrap();
        assert_eq!(unscoped, ["basic"]);

        let unscoped = store
            .select_sets(None, EmulatorVariant::Version2_2Mm)
            .unwrap();
        assert_eq!(unscoped, ["basic", "expanded"]);

        let requested = store
            .select_sets(
                Some(&["expanded".to_owned(), "missing".to_owned()]),
                EmulatorVariant::Version1_6,
            )
            .unwrap();
        assert_eq!(requested, ["expanded"]);
    }

    fn write_set(root: &Path, name: &str, metadata: &str, payloads: &[(&str, &[u8])]) {
        let payload_dir = root.join(name).join("payload");
        fs::create_dir_all(&payload_dir).unwrap();
        fs::write(root.join(name).join("metadata.json"), metadata).unwrap();
        for (file_name, data) in payloads {
            fs::write(payload_dir.join(file_name), data).unwrap();
        }
    }
}
