/// PCM sample encodings a decoder may declare in `fmt_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    Float,
    Double,
}

impl SampleFormat {
    const ALL: [Self; 8] = [
        Self::S8,
        Self::U8,
        Self::S16,
        Self::U16,
        Self::S32,
        Self::U32,
        Self::Float,
        Self::Double,
    ];

    /// Name stored in the `sample_format` metadata fact.
    pub fn name(self) -> &'static str {
        match self {
            Self::S8 => "S8",
            Self::U8 => "U8",
            Self::S16 => "S16",
            Self::U16 => "U16",
            Self::S32 => "S32",
            Self::U32 => "U32",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.code() == code)
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S8 | Self::U8 => 1,
            Self::S16 | Self::U16 => 2,
            Self::S32 | Self::U32 | Self::Float => 4,
            Self::Double => 8,
        }
    }
}
