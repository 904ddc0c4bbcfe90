//! Cell types of the primary engine and their search mappings.

use std::fmt;

use serde_json::{Value, json};

/// Length above which `keyword` sub-fields of text columns stop indexing.
pub const KEYWORD_IGNORE_ABOVE: u32 = 256;

/// A primary-engine column type, resolved once from the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Counter,
    Varint,
    Float,
    Double,
    Decimal,
    Boolean,
    Timestamp,
    Date,
    Time,
    Text,
    Varchar,
    Ascii,
    Inet,
    Uuid,
    TimeUuid,
    Blob,
    Duration,
    List(Box<CellType>),
    Set(Box<CellType>),
    Map(Box<CellType>, Box<CellType>),
    /// Any other type, indexed through its string form.
    Other(String),
}

impl CellType {
    /// Parses a type name such as `int`, `list<text>`, `frozen<map<text, int>>`
    /// or a fully qualified marshal class name.
    ///
    /// Unknown names fall back to collection handling when they mention
    /// `set`, `map` or `list`, and to [`CellType::Other`] otherwise.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(inner) = generic_args(&lower, "frozen") {
            return Self::parse(inner);
        }
        if let Some(inner) = generic_args(&lower, "list") {
            return CellType::List(Box::new(Self::parse(inner)));
        }
        if let Some(inner) = generic_args(&lower, "set") {
            return CellType::Set(Box::new(Self::parse(inner)));
        }
        if let Some(inner) = generic_args(&lower, "map") {
            let (key, value) = split_top_level(inner);
            return CellType::Map(Box::new(Self::parse(key)), Box::new(Self::parse(value)));
        }

        match lower.as_str() {
            "tinyint" => CellType::TinyInt,
            "smallint" => CellType::SmallInt,
            "int" | "integer" => CellType::Int,
            "bigint" | "long" => CellType::BigInt,
            "counter" => CellType::Counter,
            "varint" => CellType::Varint,
            "float" => CellType::Float,
            "double" => CellType::Double,
            "decimal" => CellType::Decimal,
            "boolean" => CellType::Boolean,
            "timestamp" => CellType::Timestamp,
            "date" => CellType::Date,
            "time" => CellType::Time,
            "text" => CellType::Text,
            "varchar" => CellType::Varchar,
            "ascii" => CellType::Ascii,
            "inet" => CellType::Inet,
            "uuid" => CellType::Uuid,
            "timeuuid" => CellType::TimeUuid,
            "blob" => CellType::Blob,
            "duration" => CellType::Duration,
            _ if lower.contains("set") => CellType::Set(Box::new(CellType::Other(trimmed.to_string()))),
            _ if lower.contains("map") => CellType::Map(
                Box::new(CellType::Text),
                Box::new(CellType::Other(trimmed.to_string())),
            ),
            _ if lower.contains("list") => {
                CellType::List(Box::new(CellType::Other(trimmed.to_string())))
            }
            _ => CellType::Other(trimmed.to_string()),
        }
    }

    /// True for integral types marshalled as JSON integers.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            CellType::TinyInt
                | CellType::SmallInt
                | CellType::Int
                | CellType::BigInt
                | CellType::Counter
                | CellType::Varint
        )
    }

    /// True for floating point types.
    pub fn is_floating(&self) -> bool {
        matches!(self, CellType::Float | CellType::Double)
    }

    /// True for text types that get a `keyword` sub-field.
    pub fn is_analyzed_text(&self) -> bool {
        matches!(self, CellType::Text | CellType::Varchar)
    }

    /// The JSON value written for a null or zero-length cell.
    pub fn default_value(&self) -> Value {
        match self {
            t if t.is_integral() => json!(0),
            t if t.is_floating() => json!(0.0),
            CellType::Boolean => json!(false),
            CellType::List(_) | CellType::Set(_) => json!([]),
            CellType::Map(_, _) => json!({}),
            _ => json!("null"),
        }
    }

    /// The property mapping of a field of this type.
    ///
    /// `date_format` is the Java-style pattern used for timestamps.
    pub fn mapping(&self, date_format: &str) -> Value {
        match self {
            CellType::TinyInt => json!({ "type": "byte" }),
            CellType::SmallInt => json!({ "type": "short" }),
            CellType::Int => json!({ "type": "integer" }),
            CellType::BigInt | CellType::Counter => json!({ "type": "long" }),
            CellType::Varint | CellType::Decimal => json!({ "type": "keyword" }),
            CellType::Float => json!({ "type": "float" }),
            CellType::Double => json!({ "type": "double" }),
            CellType::Boolean => json!({ "type": "boolean" }),
            CellType::Timestamp => json!({ "type": "date", "format": date_format }),
            CellType::Date => json!({ "type": "date", "format": "yyyy-MM-dd" }),
            CellType::Text | CellType::Varchar => json!({
                "type": "text",
                "fields": {
                    "keyword": {
                        "type": "keyword",
                        "ignore_above": KEYWORD_IGNORE_ABOVE
                    }
                }
            }),
            CellType::Inet => json!({ "type": "ip" }),
            CellType::Blob => json!({ "type": "binary" }),
            CellType::List(inner) | CellType::Set(inner) => inner.mapping(date_format),
            CellType::Map(_, _) => json!({ "type": "object", "dynamic": true }),
            CellType::Time
            | CellType::Ascii
            | CellType::Uuid
            | CellType::TimeUuid
            | CellType::Duration
            | CellType::Other(_) => json!({ "type": "keyword" }),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellType::TinyInt => write!(f, "tinyint"),
            CellType::SmallInt => write!(f, "smallint"),
            CellType::Int => write!(f, "int"),
            CellType::BigInt => write!(f, "bigint"),
            CellType::Counter => write!(f, "counter"),
            CellType::Varint => write!(f, "varint"),
            CellType::Float => write!(f, "float"),
            CellType::Double => write!(f, "double"),
            CellType::Decimal => write!(f, "decimal"),
            CellType::Boolean => write!(f, "boolean"),
            CellType::Timestamp => write!(f, "timestamp"),
            CellType::Date => write!(f, "date"),
            CellType::Time => write!(f, "time"),
            CellType::Text => write!(f, "text"),
            CellType::Varchar => write!(f, "varchar"),
            CellType::Ascii => write!(f, "ascii"),
            CellType::Inet => write!(f, "inet"),
            CellType::Uuid => write!(f, "uuid"),
            CellType::TimeUuid => write!(f, "timeuuid"),
            CellType::Blob => write!(f, "blob"),
            CellType::Duration => write!(f, "duration"),
            CellType::List(inner) => write!(f, "list<{}>", inner),
            CellType::Set(inner) => write!(f, "set<{}>", inner),
            CellType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            CellType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Returns the text between `<name><` and the matching final `>`.
fn generic_args<'a>(lower: &'a str, name: &str) -> Option<&'a str> {
    lower
        .strip_prefix(name)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('<'))
        .and_then(|rest| rest.strip_suffix('>'))
}

/// Splits `k, v` at the first comma that is not nested inside angle brackets.
fn split_top_level(args: &str) -> (&str, &str) {
    let mut depth = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return (&args[..i], &args[i + 1..]),
            _ => {}
        }
    }
    (args, "text")
}
