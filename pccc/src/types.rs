//! Controller data types and addressing.

/// Maximum length of the client name registered with the link service.
pub const NAME_LEN: usize = 16;

/// Maximum text length of a string element.
pub const STR_TEXT_LEN: usize = 82;

/// Maximum length of a logical ASCII address, excluding the `$` prefix
/// added on the wire.
pub const ASCII_ADDR_LEN: usize = 14;

/// Controller data file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Status, 'S' files.
    Stat,
    /// Binary, 'B' files.
    Bin,
    /// Timer, 'T' files.
    Timer,
    /// Counter, 'C' files.
    Count,
    /// Control, 'R' files.
    Ctl,
    /// Integer, 'N' files.
    Int,
    /// Floating point, 'F' files.
    Float,
    /// Output image.
    Out,
    /// Input image.
    In,
    /// String, 'ST' files.
    Str,
    /// ASCII.
    Asc,
    /// Binary coded decimal.
    Bcd,
}

impl FileType {
    /// Wire code used in typed transfer commands and file information
    /// replies.
    pub fn wire_code(self) -> u8 {
        match self {
            FileType::Out => 0x82,
            FileType::In => 0x83,
            FileType::Stat => 0x84,
            FileType::Bin => 0x85,
            FileType::Timer => 0x86,
            FileType::Count => 0x87,
            FileType::Ctl => 0x88,
            FileType::Int => 0x89,
            FileType::Float => 0x8a,
            FileType::Str => 0x8d,
            FileType::Asc => 0x8e,
            FileType::Bcd => 0x8f,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0x82 => FileType::Out,
            0x83 => FileType::In,
            0x84 => FileType::Stat,
            0x85 => FileType::Bin,
            0x86 => FileType::Timer,
            0x87 => FileType::Count,
            0x88 => FileType::Ctl,
            0x89 => FileType::Int,
            0x8a => FileType::Float,
            0x8d => FileType::Str,
            0x8e => FileType::Asc,
            0x8f => FileType::Bcd,
            _ => return None,
        })
    }

    /// Bytes one element occupies in a typed transfer, for the types
    /// this client can encode and decode.
    pub fn wire_size(self) -> Option<usize> {
        Some(match self {
            FileType::Int | FileType::Bin | FileType::Stat => 2,
            FileType::Float => 4,
            FileType::Timer | FileType::Count | FileType::Ctl => 6,
            FileType::Str => 84,
            FileType::Out | FileType::In | FileType::Asc | FileType::Bcd => return None,
        })
    }
}

/// Timer time base selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBase {
    /// 1/100 second.
    #[default]
    Hundredths,
    /// One second.
    Seconds,
}

/// A timer element. Typically stored in 'T' type data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerElement {
    pub pre: i16,
    pub acc: i16,
    pub base: TimeBase,
    /// Enabled bit.
    pub en: bool,
    /// Timing bit.
    pub tt: bool,
    /// Done bit.
    pub dn: bool,
}

/// A counter element. Typically stored in 'C' type data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterElement {
    pub pre: i16,
    pub acc: i16,
    /// Count up enable.
    pub cu: bool,
    /// Count down enable.
    pub cd: bool,
    /// Done.
    pub dn: bool,
    /// Count up overflow.
    pub ov: bool,
    /// Count down underflow.
    pub un: bool,
    /// Update accumulator.
    pub ua: bool,
}

/// A control element. Typically stored in 'R' type data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlElement {
    pub pos: i16,
    pub len: i16,
    /// Enable.
    pub en: bool,
    /// Enable unload.
    pub eu: bool,
    /// Done.
    pub dn: bool,
    /// Empty.
    pub em: bool,
    /// Error.
    pub er: bool,
    /// Unload.
    pub ul: bool,
    /// Inhibit.
    pub inh: bool,
    /// Found.
    pub fd: bool,
}

/// A string element, typically stored in 'ST' type data files. The text
/// is raw bytes; everything past `len` is padding on the wire, and reads
/// always leave the bytes beyond `len` zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringElement {
    /// Character count, at most [`STR_TEXT_LEN`].
    pub len: u16,
    pub text: [u8; STR_TEXT_LEN],
}

impl Default for StringElement {
    fn default() -> Self {
        Self {
            len: 0,
            text: [0; STR_TEXT_LEN],
        }
    }
}

impl StringElement {
    /// Build a string element from text, failing if it is too long.
    pub fn from_text(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() > STR_TEXT_LEN {
            return None;
        }
        let mut s = Self {
            len: bytes.len() as u16,
            ..Self::default()
        };
        s.text[..bytes.len()].copy_from_slice(bytes);
        Some(s)
    }

    /// The first `len` bytes of text.
    pub fn as_bytes(&self) -> &[u8] {
        &self.text[..self.len as usize]
    }
}

/// A homogeneous array of data table elements, tagged by file type.
#[derive(Debug, Clone, PartialEq)]
pub enum FileData {
    Int(Vec<i16>),
    Bin(Vec<u16>),
    Stat(Vec<u16>),
    Float(Vec<f32>),
    Timer(Vec<TimerElement>),
    Counter(Vec<CounterElement>),
    Control(Vec<ControlElement>),
    Str(Vec<StringElement>),
}

impl FileData {
    pub fn file_type(&self) -> FileType {
        match self {
            FileData::Int(_) => FileType::Int,
            FileData::Bin(_) => FileType::Bin,
            FileData::Stat(_) => FileType::Stat,
            FileData::Float(_) => FileType::Float,
            FileData::Timer(_) => FileType::Timer,
            FileData::Counter(_) => FileType::Count,
            FileData::Control(_) => FileType::Ctl,
            FileData::Str(_) => FileType::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FileData::Int(v) => v.len(),
            FileData::Bin(v) => v.len(),
            FileData::Stat(v) => v.len(),
            FileData::Float(v) => v.len(),
            FileData::Timer(v) => v.len(),
            FileData::Counter(v) => v.len(),
            FileData::Control(v) => v.len(),
            FileData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Processor modes. A given mode change command supports a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Program,
    Run,
    /// Test, continuous scan.
    TestContinuous,
    /// Test, single scan.
    TestSingle,
    /// Test, debug single step.
    TestDebug,
    RemoteTest,
    RemoteRun,
}

/// Description of a SLC data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlcFileInfo {
    /// Size of the file in bytes.
    pub bytes: u32,
    /// Number of elements in the file.
    pub elements: u16,
    pub file_type: FileType,
}

/// A PLC logical address.
///
/// Logical binary addresses carry 1..=7 levels, each 0..=999. Logical
/// ASCII addresses use the textual notation of the programming software,
/// e.g. `N7:0`, without the `$` prefix the wire form carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcAddress {
    Logical(Vec<u16>),
    Ascii(String),
}

/// Value decoded from a command reply, delivered to the caller or the
/// completion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    /// The command returns no data (writes, mode changes, echo).
    None,
    /// Elements read from a data table.
    Data(FileData),
    FileInfo(SlcFileInfo),
    /// The DH-485 maximum solicit address parameter.
    LinkParam(u8),
}
