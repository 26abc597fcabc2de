/// What to open: a URL plus a byte window into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    pub url: String,
    /// First byte to read.
    pub position: u64,
    /// Bytes to read from `position`; `None` reads to the end.
    pub length: Option<u64>,
}

impl DataSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            position: 0,
            length: None,
        }
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Inclusive last byte, if bounded.
    pub fn end_inclusive(&self) -> Option<u64> {
        self.length
            .filter(|&len| len > 0)
            .map(|len| self.position + len - 1)
    }
}
