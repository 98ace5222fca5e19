/// Written on uninstall.
pub const LOOPBACK_DEFAULT: &str = "127.0.0.1 localhost\n::1 localhost\n";

/// Full replacement content for the protected hosts file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideDocument {
    text: String,
}

impl OverrideDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn loopback_default() -> Self {
        Self::new(LOOPBACK_DEFAULT)
    }

    /// Appends a supplementary block on its own lines after the primary content.
    pub fn append_block(&mut self, block: &str) {
        let block = block.trim();
        if block.is_empty() {
            return;
        }
        self.text.push('\n');
        self.text.push_str(block);
        self.text.push('\n');
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }

    pub fn mapping_count(&self) -> usize {
        self.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}
