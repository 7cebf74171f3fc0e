#[derive(Debug, Clone, Default)]
pub struct EntryMeta {
    /// Source file path, relative to the repository root.
    pub file_path: Option<String>,

    /// Id of the pack file this entry came from or was written to.
    pub pack_id: Option<String>,

    /// Byte offset of this entry within its pack file.
    pub pack_offset: Option<usize>,

    pub is_delta: Option<bool>,

    /// CRC32 of the object's compressed on-disk bytes, as stored in a pack `.idx`.
    pub crc32: Option<u32>,
}

impl EntryMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pack_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.pack_id = Some(id.into());
        self
    }
}
