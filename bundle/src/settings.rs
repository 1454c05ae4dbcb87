use serde::Deserialize;

/// Smallest leaf payload (in bytes) that gets stored deflated
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 150;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// `pointer` fields are 64 bits wide instead of 32
    pub pointers_are_64_bits: bool,

    pub compress_threshold: usize,

    /// Keep `padding` fields in decoded records
    pub export_paddings: bool,

    /// Don't warn when a schema leaves bytes of a payload unread
    pub suppress_extra_data_warning: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            pointers_are_64_bits: false,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            export_paddings: false,
            suppress_extra_data_warning: false,
        }
    }
}
