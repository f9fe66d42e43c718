//! Capability descriptors.
//!
//! A [`CapsSet`] is the parsed form of a descriptor string such as
//! `video/x-raw, format=(string)RGB, width=(int)320, height=(int)240`.
//! Sets can be intersected during link negotiation, and a single structure
//! can be validated into a strongly-typed [`VideoCaps`] once, at the point
//! where a buffer enters the codec.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CapsError;

/// Fields dropped from both sides before intersecting during negotiation.
///
/// These describe sampling details that converters downstream absorb, and
/// keeping them would reject otherwise-compatible formats.
pub const RELAXED_FIELDS: &[&str] = &["rate", "chroma-site"];

/// A single field value inside a caps structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsValue {
    /// A fixed integer.
    Int(i64),
    /// A fixed fraction (numerator, denominator).
    Fraction(i64, i64),
    /// A fixed string.
    Str(String),
    /// An inclusive range between two numeric values.
    Range(Box<CapsValue>, Box<CapsValue>),
    /// Any one of the listed values.
    List(Vec<CapsValue>),
}

impl CapsValue {
    fn ratio(&self) -> Option<(i64, i64)> {
        match self {
            Self::Int(v) => Some((*v, 1)),
            Self::Fraction(n, d) if *d != 0 => Some((*n, *d)),
            _ => None,
        }
    }

    fn cmp_numeric(&self, other: &Self) -> Option<Ordering> {
        let (an, ad) = self.ratio()?;
        let (bn, bd) = other.ratio()?;
        let lhs = i128::from(an) * i128::from(bd) * i128::from(ad.signum() * bd.signum());
        let rhs = i128::from(bn) * i128::from(ad) * i128::from(ad.signum() * bd.signum());
        Some(lhs.cmp(&rhs))
    }

    fn contains(&self, value: &Self) -> bool {
        match self {
            Self::Range(min, max) => {
                matches!(
                    min.cmp_numeric(value),
                    Some(Ordering::Less | Ordering::Equal)
                ) && matches!(
                    value.cmp_numeric(max),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            _ => false,
        }
    }

    /// Intersects two values, returning `None` when they share nothing.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::List(items), _) => collapse(items.iter().filter_map(|v| v.intersect(other))),
            (_, Self::List(items)) => collapse(items.iter().filter_map(|v| self.intersect(v))),
            (Self::Range(a_min, a_max), Self::Range(b_min, b_max)) => {
                let lo = if a_min.cmp_numeric(b_min)? == Ordering::Less {
                    b_min
                } else {
                    a_min
                };
                let hi = if a_max.cmp_numeric(b_max)? == Ordering::Greater {
                    b_max
                } else {
                    a_max
                };
                match lo.cmp_numeric(hi)? {
                    Ordering::Greater => None,
                    Ordering::Equal => Some((**lo).clone()),
                    Ordering::Less => Some(Self::Range(lo.clone(), hi.clone())),
                }
            }
            (Self::Range(..), scalar) => self.contains(scalar).then(|| scalar.clone()),
            (scalar, Self::Range(..)) => other.contains(scalar).then(|| scalar.clone()),
            (a, b) => match a.cmp_numeric(b) {
                Some(Ordering::Equal) => Some(a.clone()),
                Some(_) => None,
                None => (a == b).then(|| a.clone()),
            },
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Fraction(..) => "fraction",
            Self::Str(_) => "string",
            Self::Range(min, _) => min.type_name(),
            Self::List(items) => items.first().map_or("string", CapsValue::type_name),
        }
    }

    fn write_bare(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Fraction(n, d) => write!(f, "{n}/{d}"),
            Self::Str(s) => f.write_str(s),
            Self::Range(min, max) => {
                f.write_str("[ ")?;
                min.write_bare(f)?;
                f.write_str(", ")?;
                max.write_bare(f)?;
                f.write_str(" ]")
            }
            Self::List(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_bare(f)?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.type_name())?;
        self.write_bare(f)
    }
}

fn collapse(values: impl Iterator<Item = CapsValue>) -> Option<CapsValue> {
    let mut values: Vec<CapsValue> = values.collect();
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(CapsValue::List(values)),
    }
}

/// One media type with its constrained fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsStructure {
    media_type: String,
    fields: BTreeMap<String, CapsValue>,
}

impl CapsStructure {
    /// Creates a structure with no field constraints.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds or replaces a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: CapsValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Returns the media type, e.g. `video/x-raw`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&CapsValue> {
        self.fields.get(name)
    }

    /// Returns a field as a fixed integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            CapsValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a field as a fixed string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            CapsValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Removes a field, returning it.
    pub fn remove(&mut self, name: &str) -> Option<CapsValue> {
        self.fields.remove(name)
    }

    /// Sets a field in place.
    pub fn set(&mut self, name: impl Into<String>, value: CapsValue) {
        self.fields.insert(name.into(), value);
    }

    /// Iterates over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &CapsValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Intersects two structures. Fields present on one side only are kept.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.media_type != other.media_type {
            return None;
        }
        let mut fields = self.fields.clone();
        for (name, theirs) in &other.fields {
            let merged = match fields.get(name) {
                Some(ours) => ours.intersect(theirs)?,
                None => theirs.clone(),
            };
            fields.insert(name.clone(), merged);
        }
        Some(Self {
            media_type: self.media_type.clone(),
            fields,
        })
    }
}

impl fmt::Display for CapsStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}={value}")?;
        }
        Ok(())
    }
}

/// A set of acceptable formats: either anything, or a list of structures.
///
/// An empty structure list means nothing is acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsSet {
    /// Every format is acceptable.
    Any,
    /// Only the listed structures are acceptable.
    Structures(Vec<CapsStructure>),
}

impl Default for CapsSet {
    fn default() -> Self {
        Self::Any
    }
}

impl CapsSet {
    /// A set accepting nothing.
    pub fn empty() -> Self {
        Self::Structures(Vec::new())
    }

    /// A set with exactly one structure.
    pub fn single(structure: CapsStructure) -> Self {
        Self::Structures(vec![structure])
    }

    /// Returns `true` if no format is acceptable.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Structures(s) if s.is_empty())
    }

    /// Returns `true` if every format is acceptable.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns the structures, or an empty slice for [`CapsSet::Any`].
    pub fn structures(&self) -> &[CapsStructure] {
        match self {
            Self::Any => &[],
            Self::Structures(s) => s,
        }
    }

    /// Intersects two sets pairwise.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Any, x) | (x, Self::Any) => x.clone(),
            (Self::Structures(ours), Self::Structures(theirs)) => Self::Structures(
                ours.iter()
                    .flat_map(|a| theirs.iter().filter_map(move |b| a.intersect(b)))
                    .collect(),
            ),
        }
    }

    /// Returns a copy with the named fields removed from every structure.
    #[must_use]
    pub fn relaxed(&self, fields: &[&str]) -> Self {
        match self {
            Self::Any => Self::Any,
            Self::Structures(structures) => Self::Structures(
                structures
                    .iter()
                    .cloned()
                    .map(|mut s| {
                        for name in fields {
                            s.remove(name);
                        }
                        s
                    })
                    .collect(),
            ),
        }
    }
}

/// Negotiates the caps for one pad during a relink.
///
/// The pad's allowed set is intersected with its template and with the set
/// already negotiated on the adjacent side. [`RELAXED_FIELDS`] are dropped
/// from the allowed and adjacent sets first.
pub fn negotiate(allowed: &CapsSet, template: &CapsSet, adjacent: &CapsSet) -> CapsSet {
    allowed
        .relaxed(RELAXED_FIELDS)
        .intersect(template)
        .intersect(&adjacent.relaxed(RELAXED_FIELDS))
}

impl fmt::Display for CapsSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Structures(s) if s.is_empty() => f.write_str("EMPTY"),
            Self::Structures(s) => {
                for (i, structure) in s.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{structure}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for CapsSet {
    type Err = CapsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        match text {
            "ANY" => return Ok(Self::Any),
            "" | "EMPTY" => return Ok(Self::empty()),
            _ => {}
        }
        split_top_level(text, ';')?
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(parse_structure)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Structures)
    }
}

fn malformed(reason: impl Into<String>) -> CapsError {
    CapsError::Malformed {
        reason: reason.into(),
    }
}

/// Splits on `sep` outside brackets, braces and quotes.
fn split_top_level(text: &str, sep: char) -> Result<Vec<&str>, CapsError> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '[' | '{' if !quoted => depth += 1,
            ']' | '}' if !quoted => {
                depth -= 1;
                if depth < 0 {
                    return Err(malformed(format!("unbalanced '{c}' in '{text}'")));
                }
            }
            c if c == sep && depth == 0 && !quoted => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 || quoted {
        return Err(malformed(format!("unterminated value in '{text}'")));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn parse_structure(text: &str) -> Result<CapsStructure, CapsError> {
    let mut parts = split_top_level(text, ',')?.into_iter();
    let media_type = parts.next().map(str::trim).unwrap_or_default();
    if media_type.is_empty() || media_type.contains('=') {
        return Err(malformed(format!("missing media type in '{text}'")));
    }
    let mut structure = CapsStructure::new(media_type);
    for field in parts {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| malformed(format!("field without '=': '{field}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed(format!("field without name: '{field}'")));
        }
        structure
            .fields
            .insert(name.to_string(), parse_value(value.trim())?);
    }
    Ok(structure)
}

fn parse_value(text: &str) -> Result<CapsValue, CapsError> {
    let (type_hint, body) = match text.strip_prefix('(') {
        Some(rest) => {
            let (hint, body) = rest
                .split_once(')')
                .ok_or_else(|| malformed(format!("unterminated type in '{text}'")))?;
            (Some(hint.trim()), body.trim())
        }
        None => (None, text),
    };

    if let Some(inner) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        let bounds = split_top_level(inner, ',')?;
        let [min, max] = bounds.as_slice() else {
            return Err(malformed(format!("range needs two bounds: '{body}'")));
        };
        let min = parse_scalar(type_hint, min.trim())?;
        let max = parse_scalar(type_hint, max.trim())?;
        if min.ratio().is_none() || max.ratio().is_none() {
            return Err(malformed(format!("range bounds must be numeric: '{body}'")));
        }
        return Ok(CapsValue::Range(Box::new(min), Box::new(max)));
    }
    if let Some(inner) = body.strip_prefix('{').and_then(|b| b.strip_suffix('}')) {
        let items = split_top_level(inner, ',')?
            .into_iter()
            .map(|item| parse_scalar(type_hint, item.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(CapsValue::List(items));
    }
    parse_scalar(type_hint, body)
}

fn parse_scalar(type_hint: Option<&str>, text: &str) -> Result<CapsValue, CapsError> {
    let unquoted = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    let as_int = || {
        unquoted
            .parse::<i64>()
            .map(CapsValue::Int)
            .map_err(|_| malformed(format!("not an integer: '{text}'")))
    };
    let as_fraction = || {
        let (n, d) = unquoted
            .split_once('/')
            .ok_or_else(|| malformed(format!("not a fraction: '{text}'")))?;
        match (n.trim().parse(), d.trim().parse()) {
            (Ok(n), Ok(d)) => Ok(CapsValue::Fraction(n, d)),
            _ => Err(malformed(format!("not a fraction: '{text}'"))),
        }
    };
    match type_hint {
        Some("int" | "i") => as_int(),
        Some("fraction") => as_fraction().or_else(|_| as_int()),
        Some("string" | "s") => Ok(CapsValue::Str(unquoted.to_string())),
        Some(other) => Err(malformed(format!("unknown field type '{other}'"))),
        None if unquoted != text => Ok(CapsValue::Str(unquoted.to_string())),
        None => as_int()
            .or_else(|_| as_fraction())
            .or_else(|_| Ok(CapsValue::Str(unquoted.to_string()))),
    }
}

/// Pixel layouts the codec knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 24-bit, red first.
    Rgb,
    /// Packed 24-bit, blue first.
    Bgr,
    /// Packed 32-bit, red first, padding last.
    Rgbx,
    /// Packed 32-bit, blue first, padding last.
    Bgrx,
    /// Packed 32-bit, red first, alpha last.
    Rgba,
    /// Packed 32-bit, blue first, alpha last.
    Bgra,
    /// Planar YUV 4:2:0.
    I420,
    /// Anything else; carried for diagnostics.
    Other(String),
}

impl PixelFormat {
    /// Parses a caps `format` tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "RGB" => Self::Rgb,
            "BGR" => Self::Bgr,
            "RGBx" => Self::Rgbx,
            "BGRx" => Self::Bgrx,
            "RGBA" => Self::Rgba,
            "BGRA" => Self::Bgra,
            "I420" => Self::I420,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the caps `format` tag.
    pub fn tag(&self) -> &str {
        match self {
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
            Self::Rgbx => "RGBx",
            Self::Bgrx => "BGRx",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
            Self::I420 => "I420",
            Self::Other(tag) => tag,
        }
    }

    /// Bytes per pixel for packed formats.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Rgb | Self::Bgr => Some(3),
            Self::Rgbx | Self::Bgrx | Self::Rgba | Self::Bgra => Some(4),
            Self::I420 | Self::Other(_) => None,
        }
    }

    /// Bits per pixel implied by the format.
    pub fn default_bit_depth(&self) -> u32 {
        match self {
            Self::I420 => 12,
            other => other.bytes_per_pixel().map_or(8, |b| b as u32 * 8),
        }
    }

    /// Returns `true` for blue-first packed layouts.
    pub fn is_blue_first(&self) -> bool {
        matches!(self, Self::Bgr | Self::Bgrx | Self::Bgra)
    }

    /// The same layout with red and blue exchanged.
    ///
    /// Formats without a red/blue order are returned unchanged.
    #[must_use]
    pub fn swapped(&self) -> Self {
        match self {
            Self::Rgb => Self::Bgr,
            Self::Bgr => Self::Rgb,
            Self::Rgbx => Self::Bgrx,
            Self::Bgrx => Self::Rgbx,
            Self::Rgba => Self::Bgra,
            Self::Bgra => Self::Rgba,
            other => other.clone(),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How lines of a frame are scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Whole frames.
    Progressive,
    /// Any non-progressive mode, by its caps name.
    Interlaced(String),
}

/// A validated raw-video descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCaps {
    /// Pixel layout.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bits per pixel.
    pub bit_depth: u32,
    /// Scan mode; always progressive once validated.
    pub scan: ScanMode,
}

impl VideoCaps {
    /// Parses and validates a descriptor string.
    ///
    /// Only the first structure is considered.
    pub fn parse(text: &str) -> Result<Self, CapsError> {
        let caps: CapsSet = text.parse()?;
        let structure = caps.structures().first().ok_or(CapsError::Empty)?;
        Self::from_structure(structure)
    }

    /// Validates a parsed structure.
    pub fn from_structure(structure: &CapsStructure) -> Result<Self, CapsError> {
        let width = positive_dimension(structure, "width")?;
        let height = positive_dimension(structure, "height")?;
        let format = PixelFormat::from_tag(structure.get_str("format").unwrap_or("RGB"));

        let scan = match structure.get_str("interlace-mode") {
            None | Some("progressive") => ScanMode::Progressive,
            Some(mode) => {
                return Err(CapsError::NotProgressive {
                    mode: mode.to_string(),
                })
            }
        };

        let bit_depth = structure
            .get_int("bpp")
            .or_else(|| structure.get_int("depth"))
            .and_then(|d| u32::try_from(d).ok())
            .filter(|d| *d > 0)
            .unwrap_or_else(|| format.default_bit_depth());

        Ok(Self {
            format,
            width,
            height,
            bit_depth,
            scan,
        })
    }
}

fn positive_dimension(structure: &CapsStructure, field: &'static str) -> Result<u32, CapsError> {
    let value = structure
        .get_int(field)
        .ok_or(CapsError::MissingField { field })?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(CapsError::NonPositive { field, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_structure() {
        let caps: CapsSet = "video/x-raw, format=(string)RGB, width=(int)320, height=(int)240, framerate=(fraction)30/1"
            .parse()
            .unwrap();
        let s = &caps.structures()[0];
        assert_eq!(s.media_type(), "video/x-raw");
        assert_eq!(s.get_str("format"), Some("RGB"));
        assert_eq!(s.get_int("width"), Some(320));
        assert_eq!(s.get("framerate"), Some(&CapsValue::Fraction(30, 1)));
    }

    #[test]
    fn test_parse_untyped_filter() {
        let caps: CapsSet = "video/x-raw,width=500,height=200".parse().unwrap();
        let s = &caps.structures()[0];
        assert_eq!(s.get_int("width"), Some(500));
        assert_eq!(s.get_int("height"), Some(200));
    }

    #[test]
    fn test_parse_ranges_and_lists() {
        let caps: CapsSet =
            "video/x-raw, format=(string){ I420, RGB }, width=(int)[ 1, 4096 ]; video/x-bayer"
                .parse()
                .unwrap();
        assert_eq!(caps.structures().len(), 2);
        let s = &caps.structures()[0];
        assert_eq!(
            s.get("format"),
            Some(&CapsValue::List(vec![
                CapsValue::Str("I420".into()),
                CapsValue::Str("RGB".into())
            ]))
        );
        assert!(matches!(s.get("width"), Some(CapsValue::Range(..))));
    }

    #[test]
    fn test_parse_any_and_empty() {
        assert!("ANY".parse::<CapsSet>().unwrap().is_any());
        assert!("EMPTY".parse::<CapsSet>().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_unbalanced() {
        assert!(matches!(
            "video/x-raw, width=(int)[ 1, 2".parse::<CapsSet>(),
            Err(CapsError::Malformed { .. })
        ));
    }

    #[test]
    fn test_display_reparses() {
        let text = "video/x-raw, format=(string){ I420, RGB }, width=(int)[ 1, 4096 ]";
        let caps: CapsSet = text.parse().unwrap();
        let again: CapsSet = caps.to_string().parse().unwrap();
        assert_eq!(caps, again);
    }

    #[test]
    fn test_intersect_list_with_scalar() {
        let a: CapsSet = "video/x-raw, format=(string){ I420, RGB }".parse().unwrap();
        let b: CapsSet = "video/x-raw, format=(string)RGB, width=(int)8".parse().unwrap();
        let result = a.intersect(&b);
        let s = &result.structures()[0];
        assert_eq!(s.get_str("format"), Some("RGB"));
        assert_eq!(s.get_int("width"), Some(8));
    }

    #[test]
    fn test_intersect_ranges() {
        let a: CapsSet = "video/x-raw, width=(int)[ 1, 100 ]".parse().unwrap();
        let b: CapsSet = "video/x-raw, width=(int)[ 50, 200 ]".parse().unwrap();
        let s = a.intersect(&b).structures()[0].clone();
        assert_eq!(
            s.get("width"),
            Some(&CapsValue::Range(
                Box::new(CapsValue::Int(50)),
                Box::new(CapsValue::Int(100))
            ))
        );

        let c: CapsSet = "video/x-raw, width=(int)[ 101, 200 ]".parse().unwrap();
        assert!(a.intersect(&c).is_empty());
    }

    #[test]
    fn test_intersect_fraction_range() {
        let a: CapsSet = "video/x-raw, framerate=(fraction)[ 0/1, 60/1 ]".parse().unwrap();
        let b: CapsSet = "video/x-raw, framerate=(fraction)30/1".parse().unwrap();
        let s = a.intersect(&b).structures()[0].clone();
        assert_eq!(s.get("framerate"), Some(&CapsValue::Fraction(30, 1)));
    }

    #[test]
    fn test_intersect_media_type_mismatch() {
        let a: CapsSet = "video/x-raw".parse().unwrap();
        let b: CapsSet = "audio/x-raw".parse().unwrap();
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&CapsSet::Any), a);
    }

    #[test]
    fn test_negotiate_relaxes_rate() {
        let allowed: CapsSet = "video/x-raw, format=(string)RGB, rate=(int)30".parse().unwrap();
        let adjacent: CapsSet = "video/x-raw, format=(string)RGB, rate=(int)25".parse().unwrap();
        let result = negotiate(&allowed, &CapsSet::Any, &adjacent);
        assert!(!result.is_empty());
        assert!(result.structures()[0].get("rate").is_none());

        // Without relaxing, the rate mismatch would reject the pair.
        assert!(allowed.intersect(&adjacent).is_empty());
    }

    #[test]
    fn test_video_caps_parse() {
        let caps = VideoCaps::parse(
            "video/x-raw, format=(string)BGRx, width=(int)640, height=(int)480, interlace-mode=(string)progressive",
        )
        .unwrap();
        assert_eq!(caps.format, PixelFormat::Bgrx);
        assert_eq!(caps.width, 640);
        assert_eq!(caps.height, 480);
        assert_eq!(caps.bit_depth, 32);
        assert_eq!(caps.scan, ScanMode::Progressive);
    }

    #[test]
    fn test_video_caps_bpp_field() {
        let caps =
            VideoCaps::parse("video/x-raw, format=(string)RGB, bpp=(int)24, width=4, height=2")
                .unwrap();
        assert_eq!(caps.bit_depth, 24);
    }

    #[test]
    fn test_video_caps_missing_width() {
        let err = VideoCaps::parse("video/x-raw, format=(string)RGB, height=(int)240").unwrap_err();
        assert_eq!(err, CapsError::MissingField { field: "width" });
    }

    #[test]
    fn test_video_caps_non_positive() {
        let err = VideoCaps::parse("video/x-raw, width=(int)0, height=(int)240").unwrap_err();
        assert_eq!(
            err,
            CapsError::NonPositive {
                field: "width",
                value: 0
            }
        );
    }

    #[test]
    fn test_video_caps_interlaced() {
        let err = VideoCaps::parse(
            "video/x-raw, width=(int)8, height=(int)8, interlace-mode=(string)interleaved",
        )
        .unwrap_err();
        assert!(matches!(err, CapsError::NotProgressive { .. }));
    }

    #[test]
    fn test_pixel_format_swap_is_involutive() {
        for tag in ["RGB", "BGR", "RGBx", "BGRx", "RGBA", "BGRA", "I420"] {
            let format = PixelFormat::from_tag(tag);
            assert_eq!(format.swapped().swapped(), format);
        }
    }
}
