//! File content types and the media converter seam

use crate::storage::StoreResult;

/// Media type recorded for text content
pub const TEXT_MEDIA_TYPE: &str = "text/plain";

/// Media type recorded for raw binary content
pub const BINARY_MEDIA_TYPE: &str = "application/octet-stream";

/// Content of a file as seen by callers of `FileHandle::read`/`write`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    /// Text or JSON; stored inline when small enough
    Text(String),
    /// Raw bytes; always stored in the blob store
    Bytes(Vec<u8>),
}

impl FileData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileData::Text(text) => Some(text),
            FileData::Bytes(_) => None,
        }
    }

    /// Size of the content in bytes
    pub fn len(&self) -> usize {
        match self {
            FileData::Text(text) => text.len(),
            FileData::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FileData::Text(text) => text.into_bytes(),
            FileData::Bytes(bytes) => bytes,
        }
    }

    pub(crate) fn media_type(&self) -> &'static str {
        match self {
            FileData::Text(_) => TEXT_MEDIA_TYPE,
            FileData::Bytes(_) => BINARY_MEDIA_TYPE,
        }
    }
}

impl From<&str> for FileData {
    fn from(text: &str) -> Self {
        FileData::Text(text.to_string())
    }
}

impl From<String> for FileData {
    fn from(text: String) -> Self {
        FileData::Text(text)
    }
}

impl From<Vec<u8>> for FileData {
    fn from(bytes: Vec<u8>) -> Self {
        FileData::Bytes(bytes)
    }
}

/// Bytes plus media type produced by a [`MediaConverter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMedia {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Converts the application's in-editor media representation to and from bytes
///
/// Implemented by the embedding application (image decoders, audio buffers,
/// ...); the engine only moves the encoded bytes.
pub trait MediaConverter {
    type Resource;

    fn encode(&self, resource: &Self::Resource) -> StoreResult<EncodedMedia>;

    fn decode(&self, media: EncodedMedia) -> StoreResult<Self::Resource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_data_conversions() {
        let text = FileData::from("hello");
        assert_eq!(text.as_text(), Some("hello"));
        assert_eq!(text.len(), 5);
        assert_eq!(text.media_type(), TEXT_MEDIA_TYPE);

        let bytes = FileData::from(vec![1u8, 2]);
        assert_eq!(bytes.as_text(), None);
        assert_eq!(bytes.media_type(), BINARY_MEDIA_TYPE);
        assert_eq!(bytes.into_bytes(), vec![1, 2]);
        assert!(FileData::from(String::new()).is_empty());
    }
}
