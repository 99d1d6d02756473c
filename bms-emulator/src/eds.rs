//! EDS parsing and the object dictionary model.
//!
//! The EDS device description is a line-oriented document: `[XXXX]` headers
//! open a top-level object (hex index), `[XXXXsubN]` headers open a subindex
//! record under the most recently opened object, and `key=value` lines assign
//! attributes to whichever record is open. Metadata sections such as
//! `[FileInfo]` do not describe addressable parameters and are skipped.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use canopen_common::SdoDataType;
use log::debug;

/// Sections that carry file/device metadata rather than addressable objects.
const IGNORED_SECTIONS: [&str; 3] = ["FileInfo", "DeviceInfo", "Communication"];

/// One addressable unit of the dictionary.
///
/// `subindex == None` means the entry is a simple variable addressed by its
/// index alone; subindex records of an array or record object carry `Some`.
#[derive(Debug, Clone)]
pub struct DictionaryEntry {
    pub index: u16,
    pub subindex: Option<u8>,
    /// Join key into the value store.
    pub parameter_name: Option<String>,
    /// Declared wire type, if the EDS names one the codec supports.
    pub data_type: Option<SdoDataType>,
    attributes: HashMap<String, String>,
}

impl DictionaryEntry {
    fn new(index: u16, subindex: Option<u8>) -> Self {
        Self {
            index,
            subindex,
            parameter_name: None,
            data_type: None,
            attributes: HashMap::new(),
        }
    }

    /// Raw attribute as written in the document (`AccessType`, `DefaultValue`, ...).
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn assign(&mut self, key: &str, value: &str) {
        match key {
            "ParameterName" => self.parameter_name = Some(value.to_string()),
            "DataType" => self.data_type = SdoDataType::from_eds_type(value),
            _ => {}
        }
        // Every key is kept verbatim, including the two interpreted above.
        self.attributes.insert(key.to_string(), value.to_string());
    }
}

/// Immutable map of all addressable parameters, built once at startup.
#[derive(Debug, Default)]
pub struct ObjectDictionary {
    entries: HashMap<(u16, Option<u8>), DictionaryEntry>,
}

impl ObjectDictionary {
    /// Resolve a wire address against the dictionary.
    ///
    /// A request for subindex 0 falls back to the simple-variable entry when
    /// no explicit subindex record exists, since simple variables are
    /// addressed with subindex 0 on the wire.
    pub fn get(&self, index: u16, subindex: u8) -> Option<&DictionaryEntry> {
        self.entries.get(&(index, Some(subindex))).or_else(|| {
            if subindex == 0 {
                self.entries.get(&(index, None))
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log every entry at debug level, sorted by address.
    pub fn log_summary(&self) {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        for key in keys {
            let entry = &self.entries[key];
            let subindex = match entry.subindex {
                Some(sub) => format!("{:02X}", sub),
                None => "--".to_string(),
            };
            debug!(
                "  0x{:04X}:{} {} ({})",
                entry.index,
                subindex,
                entry.parameter_name.as_deref().unwrap_or("<unnamed>"),
                entry
                    .data_type
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unsupported type".to_string()),
            );
        }
    }
}

/// Errors raised while turning an EDS document into an [`ObjectDictionary`].
#[derive(Debug)]
pub enum EdsError {
    Io(io::Error),
    /// A `[XXXXsubN]` header appeared before any top-level object.
    SubIndexWithoutObject { line: usize },
    /// A `key=value` line appeared before any section header.
    AttributeOutsideSection { line: usize },
    /// The same `(index, subindex)` address was defined twice.
    DuplicateEntry { index: u16, subindex: Option<u8> },
}

impl fmt::Display for EdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read EDS file: {}", e),
            Self::SubIndexWithoutObject { line } => {
                write!(f, "line {}: subindex header before any object header", line)
            }
            Self::AttributeOutsideSection { line } => {
                write!(f, "line {}: attribute assignment outside any section", line)
            }
            Self::DuplicateEntry { index, subindex } => match subindex {
                Some(sub) => write!(f, "duplicate entry 0x{:04X}:{:02X}", index, sub),
                None => write!(f, "duplicate entry 0x{:04X}", index),
            },
        }
    }
}

impl Error for EdsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EdsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// What a bracketed section header names.
enum SectionHeader {
    Object(u16),
    SubIndex(u8),
    Metadata,
}

/// Explicit parser state threaded through line processing.
struct ParserState {
    /// Index of the most recently opened top-level object.
    current_index: Option<u16>,
    /// Address of the record attribute lines currently attach to.
    open_entry: Option<(u16, Option<u8>)>,
    /// Inside a metadata section whose body is discarded.
    skipping: bool,
}

/// Parse an EDS document from a file path.
pub fn parse_eds_file(path: &Path) -> Result<ObjectDictionary, EdsError> {
    let content = fs::read_to_string(path)?;
    parse_eds(&content)
}

/// Parse an EDS document from its content.
pub fn parse_eds(content: &str) -> Result<ObjectDictionary, EdsError> {
    let mut dictionary = ObjectDictionary::default();
    let mut state = ParserState {
        current_index: None,
        open_entry: None,
        skipping: false,
    };

    for (number, raw_line) in content.lines().enumerate() {
        let line_number = number + 1;

        // Strip trailing `;` comments, then surrounding whitespace.
        let line = match raw_line.find(';') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(inner) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            match classify_header(inner) {
                SectionHeader::Object(index) => {
                    let key = (index, None);
                    if dictionary.entries.contains_key(&key) {
                        return Err(EdsError::DuplicateEntry {
                            index,
                            subindex: None,
                        });
                    }
                    dictionary
                        .entries
                        .insert(key, DictionaryEntry::new(index, None));
                    state.current_index = Some(index);
                    state.open_entry = Some(key);
                    state.skipping = false;
                }
                SectionHeader::SubIndex(sub) => {
                    let index = state
                        .current_index
                        .ok_or(EdsError::SubIndexWithoutObject { line: line_number })?;
                    let key = (index, Some(sub));
                    if dictionary.entries.contains_key(&key) {
                        return Err(EdsError::DuplicateEntry {
                            index,
                            subindex: Some(sub),
                        });
                    }
                    dictionary
                        .entries
                        .insert(key, DictionaryEntry::new(index, Some(sub)));
                    state.open_entry = Some(key);
                    state.skipping = false;
                }
                SectionHeader::Metadata => {
                    debug!("skipping section [{}]", inner);
                    state.open_entry = None;
                    state.skipping = true;
                }
            }
            continue;
        }

        if state.skipping {
            continue;
        }

        if let Some((key, value)) = split_attribute(line) {
            let open = state
                .open_entry
                .ok_or(EdsError::AttributeOutsideSection { line: line_number })?;
            if let Some(entry) = dictionary.entries.get_mut(&open) {
                entry.assign(key, value);
            }
        }
        // Lines matching neither pattern carry no meaning and are skipped.
    }

    Ok(dictionary)
}

/// Classify the text inside a bracketed header.
///
/// Named sections on the ignore list, and any other header that is not a
/// valid hex index, are metadata: their body never becomes dictionary data.
fn classify_header(inner: &str) -> SectionHeader {
    if IGNORED_SECTIONS.contains(&inner) {
        return SectionHeader::Metadata;
    }

    if let Some(pos) = inner.find("sub") {
        let index_ok = !inner[..pos].is_empty() && u16::from_str_radix(&inner[..pos], 16).is_ok();
        if index_ok {
            if let Ok(sub) = inner[pos + 3..].parse::<u8>() {
                return SectionHeader::SubIndex(sub);
            }
        }
        return SectionHeader::Metadata;
    }

    match u16::from_str_radix(inner, 16) {
        Ok(index) => SectionHeader::Object(index),
        Err(_) => SectionHeader::Metadata,
    }
}

/// Split a `key=value` attribute line, if the line is one.
fn split_attribute(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_variable() {
        let dictionary = parse_eds("[2100]\nParameterName=SOC\nDataType=0x05\n").unwrap();
        assert_eq!(dictionary.len(), 1);

        let entry = dictionary.get(0x2100, 0).unwrap();
        assert_eq!(entry.index, 0x2100);
        assert_eq!(entry.subindex, None);
        assert_eq!(entry.parameter_name.as_deref(), Some("SOC"));
        assert_eq!(entry.data_type, Some(SdoDataType::Unsigned8));
    }

    #[test]
    fn parses_subindex_records_under_their_object() {
        let doc = "\
[2100]
ParameterName=BatteryStatus
SubNumber=2
[2100sub1]
ParameterName=SOC
DataType=0x0005
[2100sub2]
ParameterName=PackVoltage
DataType=0x0006
";
        let dictionary = parse_eds(doc).unwrap();
        assert_eq!(dictionary.len(), 3);

        let soc = dictionary.get(0x2100, 1).unwrap();
        assert_eq!(soc.subindex, Some(1));
        assert_eq!(soc.parameter_name.as_deref(), Some("SOC"));
        assert_eq!(soc.data_type, Some(SdoDataType::Unsigned8));

        let voltage = dictionary.get(0x2100, 2).unwrap();
        assert_eq!(voltage.data_type, Some(SdoDataType::Unsigned16));
    }

    #[test]
    fn strips_comments_and_blank_lines() {
        let doc = "\
; top of file comment

[2100]   ; battery object
ParameterName=SOC ; state of charge
DataType=0x05
";
        let dictionary = parse_eds(doc).unwrap();
        let entry = dictionary.get(0x2100, 0).unwrap();
        assert_eq!(entry.parameter_name.as_deref(), Some("SOC"));
        assert_eq!(entry.data_type, Some(SdoDataType::Unsigned8));
    }

    #[test]
    fn ignored_sections_never_become_entries() {
        let doc = "\
[DeviceInfo]
VendorName=Example
ProductName=BMS
[FileInfo]
FileName=bms.eds
[2100]
ParameterName=SOC
DataType=0x05
";
        let dictionary = parse_eds(doc).unwrap();
        assert_eq!(dictionary.len(), 1);
        assert!(dictionary.get(0x2100, 0).is_some());
    }

    #[test]
    fn unknown_named_sections_do_not_attach_to_the_open_object() {
        let doc = "\
[2100]
ParameterName=SOC
DataType=0x05
[MandatoryObjects]
SupportedObjects=1
1=0x2100
";
        let dictionary = parse_eds(doc).unwrap();
        let entry = dictionary.get(0x2100, 0).unwrap();
        assert_eq!(entry.attribute("SupportedObjects"), None);
    }

    #[test]
    fn unknown_attribute_keys_are_kept_opaquely() {
        let doc = "\
[2100]
ParameterName=SOC
DataType=0x05
AccessType=ro
DefaultValue=0
";
        let dictionary = parse_eds(doc).unwrap();
        let entry = dictionary.get(0x2100, 0).unwrap();
        assert_eq!(entry.attribute("AccessType"), Some("ro"));
        assert_eq!(entry.attribute("DefaultValue"), Some("0"));
    }

    #[test]
    fn unsupported_data_type_is_parsed_but_unresolved() {
        let dictionary =
            parse_eds("[2100]\nParameterName=Temperature\nDataType=0x0008\n").unwrap();
        let entry = dictionary.get(0x2100, 0).unwrap();
        assert_eq!(entry.data_type, None);
        assert_eq!(entry.attribute("DataType"), Some("0x0008"));
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let doc = "\
[2100]
[2100sub1]
ParameterName=SOC
[2100sub1]
ParameterName=SOC_again
";
        match parse_eds(doc) {
            Err(EdsError::DuplicateEntry {
                index: 0x2100,
                subindex: Some(1),
            }) => {}
            other => panic!("expected duplicate entry error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_subindex_before_any_object() {
        match parse_eds("[2100sub1]\nParameterName=SOC\n") {
            Err(EdsError::SubIndexWithoutObject { line: 1 }) => {}
            other => panic!("expected subindex-without-object error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_attribute_before_any_section() {
        match parse_eds("ParameterName=SOC\n[2100]\n") {
            Err(EdsError::AttributeOutsideSection { line: 1 }) => {}
            other => panic!("expected attribute-outside-section error, got {:?}", other),
        }
    }

    #[test]
    fn simple_variable_is_not_addressable_at_nonzero_subindex() {
        let dictionary = parse_eds("[2100]\nParameterName=SOC\nDataType=0x05\n").unwrap();
        assert!(dictionary.get(0x2100, 1).is_none());
    }

    #[test]
    fn parses_a_realistic_document() {
        let doc = "\
[FileInfo]
FileName=bms.eds
FileVersion=1
CreatedBy=FTEX

[DeviceInfo]
VendorName=FTEX
ProductName=BMS

[Communication]
Baudrate=500000

[2100]
ParameterName=BatteryMonitoring
ObjectType=0x09
SubNumber=3

[2100sub1]
ParameterName=SOC          ; percent
DataType=0x0005
AccessType=ro

[2100sub2]
ParameterName=PackVoltage  ; millivolts
DataType=0x0007
AccessType=ro

[2100sub3]
ParameterName=PackCurrent  ; milliamps, signed
DataType=0x0004
AccessType=ro

[2101]
ParameterName=CellCount
DataType=0x0005
AccessType=ro
";
        let dictionary = parse_eds(doc).unwrap();
        assert_eq!(dictionary.len(), 5);

        let current = dictionary.get(0x2100, 3).unwrap();
        assert_eq!(current.parameter_name.as_deref(), Some("PackCurrent"));
        assert_eq!(current.data_type, Some(SdoDataType::Signed32));
        assert_eq!(current.attribute("AccessType"), Some("ro"));

        let cells = dictionary.get(0x2101, 0).unwrap();
        assert_eq!(cells.parameter_name.as_deref(), Some("CellCount"));
    }
}
