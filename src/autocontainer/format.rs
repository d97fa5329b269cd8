//! printf-style rendering of container names
//!
//! Container formats are configured as a single integer conversion such as
//! `%016X`, optionally surrounded by literal text (`%%` is a literal percent).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("format '{0}' has no integer conversion")]
    MissingConversion(String),
    #[error("format '{0}' has more than one conversion")]
    TooManyConversions(String),
    #[error("unsupported conversion '{conversion}' in format '{format}'")]
    UnsupportedConversion { format: String, conversion: char },
    #[error("format '{0}' ends inside a conversion")]
    Truncated(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    UpperHex,
    LowerHex,
    Decimal,
    Octal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    Spaces,
    Zeros,
    LeftAligned,
}

/// A parsed container name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFormat {
    prefix: String,
    suffix: String,
    padding: Padding,
    width: usize,
    conversion: Conversion,
}

impl ContainerFormat {
    /// Render `value` through the template.
    pub fn render(&self, value: u64) -> String {
        let digits = match self.conversion {
            Conversion::UpperHex => format!("{:X}", value),
            Conversion::LowerHex => format!("{:x}", value),
            Conversion::Decimal => value.to_string(),
            Conversion::Octal => format!("{:o}", value),
        };
        let width = self.width;
        let body = match self.padding {
            Padding::Zeros => format!("{:0>width$}", digits),
            Padding::Spaces => format!("{:>width$}", digits),
            Padding::LeftAligned => format!("{:<width$}", digits),
        };
        format!("{}{}{}", self.prefix, body, self.suffix)
    }
}

impl Default for ContainerFormat {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            padding: Padding::Zeros,
            width: 16,
            conversion: Conversion::UpperHex,
        }
    }
}

impl FromStr for ContainerFormat {
    type Err = FormatError;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut spec: Option<(Padding, usize, Conversion)> = None;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            let literal = if spec.is_some() { &mut suffix } else { &mut prefix };
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }
            if spec.is_some() {
                return Err(FormatError::TooManyConversions(template.to_string()));
            }

            let mut padding = Padding::Spaces;
            match chars.peek() {
                Some('0') => {
                    padding = Padding::Zeros;
                    chars.next();
                }
                Some('-') => {
                    padding = Padding::LeftAligned;
                    chars.next();
                }
                _ => {}
            }
            let mut width = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                width = width * 10 + d as usize;
                chars.next();
            }
            let conversion = match chars.next() {
                Some('X') => Conversion::UpperHex,
                Some('x') => Conversion::LowerHex,
                Some('d') | Some('i') | Some('u') => Conversion::Decimal,
                Some('o') => Conversion::Octal,
                Some(other) => {
                    return Err(FormatError::UnsupportedConversion {
                        format: template.to_string(),
                        conversion: other,
                    })
                }
                None => return Err(FormatError::Truncated(template.to_string())),
            };
            spec = Some((padding, width, conversion));
        }

        let (padding, width, conversion) =
            spec.ok_or_else(|| FormatError::MissingConversion(template.to_string()))?;
        Ok(Self { prefix, suffix, padding, width, conversion })
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = match self.padding {
            Padding::Zeros => "0",
            Padding::LeftAligned => "-",
            Padding::Spaces => "",
        };
        let conversion = match self.conversion {
            Conversion::UpperHex => 'X',
            Conversion::LowerHex => 'x',
            Conversion::Decimal => 'd',
            Conversion::Octal => 'o',
        };
        let width = if self.width > 0 { self.width.to_string() } else { String::new() };
        write!(
            f,
            "{}%{}{}{}{}",
            self.prefix.replace('%', "%%"),
            flag,
            width,
            conversion,
            self.suffix.replace('%', "%%")
        )
    }
}
