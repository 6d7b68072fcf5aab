//! Tokenizer for line-oriented EDIGEO records.
//!
//! Every record is one line of the form `NNNTFLL:value`: a three-letter
//! descriptor name, a value-type character, a format character, a two-digit
//! value length, a colon and the value itself. The scanner yields borrowed
//! `(tag, value)` pairs without copying; empty lines, trailing whitespace
//! and CR/LF variants are tolerated. Unknown tags are yielded as-is and
//! filtered by the caller.

use crate::{Error, Result};

/// One decoded record line, borrowing from the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Three-letter descriptor name, e.g. `RTY`, `RID`, `COR`
    pub tag: &'a str,
    /// Raw value with the declared length applied
    pub value: &'a str,
}

/// Lazy scanner over the records of one EDIGEO file.
pub struct Scanner<'a> {
    name: &'a str,
    lines: std::str::Lines<'a>,
    line_no: usize,
}

impl<'a> Scanner<'a> {
    /// `name` is only used in error messages (the archive member name).
    pub fn new(name: &'a str, input: &'a str) -> Self {
        Self {
            name,
            lines: input.lines(),
            line_no: 0,
        }
    }

    fn parse_line(&self, line: &'a str) -> Result<Field<'a>> {
        let malformed = || Error::Record {
            file: self.name.to_string(),
            line: self.line_no,
        };
        // Minimum viable record: 3-char tag + 4 descriptor chars + colon.
        let colon = line.find(':').ok_or_else(malformed)?;
        if colon < 7 || !line.is_char_boundary(3) {
            return Err(malformed());
        }
        let tag = &line[..3];
        if !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(malformed());
        }
        let mut value = line[colon + 1..].trim_end_matches(['\r', ' ']);
        // The two digits before the colon declare the value length; honor
        // it when it is in bounds, otherwise fall back to the trimmed rest.
        if let Some(len) = line
            .get(colon - 2..colon)
            .and_then(|digits| digits.parse::<usize>().ok())
        {
            if len <= value.len() && value.is_char_boundary(len) {
                value = &value[..len];
            }
        }
        Ok(Field { tag, value })
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(self.parse_line(line));
        }
    }
}

/// A group of records introduced by an `RTY` descriptor.
#[derive(Debug, Clone)]
pub struct Block<'a> {
    /// The `RTY` value, e.g. `PNO`, `PAR`, `PFE`, `FEA`, `LNK`
    pub ty: &'a str,
    pub fields: Vec<Field<'a>>,
}

impl<'a> Block<'a> {
    /// First value of `tag` in this block, if any.
    pub fn first(&self, tag: &str) -> Option<&'a str> {
        self.fields.iter().find(|f| f.tag == tag).map(|f| f.value)
    }

    /// All values of `tag`, in record order.
    pub fn all(&self, tag: &'a str) -> impl Iterator<Item = &'a str> + '_ {
        self.fields
            .iter()
            .filter(move |f| f.tag == tag)
            .map(|f| f.value)
    }

    /// The block identifier (`RID`).
    pub fn id(&self) -> Option<&'a str> {
        self.first("RID")
    }
}

/// Group the records of one file into `RTY`-delimited blocks.
/// Records before the first `RTY` (file headers such as `BOM`, `CSE`)
/// are dropped.
pub fn blocks<'a>(name: &'a str, input: &'a str) -> Result<Vec<Block<'a>>> {
    let mut out: Vec<Block<'a>> = Vec::new();
    for field in Scanner::new(name, input) {
        let field = field?;
        if field.tag == "RTY" {
            out.push(Block {
                ty: field.value,
                fields: Vec::new(),
            });
        } else if let Some(block) = out.last_mut() {
            block.fields.push(field);
        }
    }
    Ok(out)
}

/// Split a composite value into its `;`-separated components, dropping
/// the trailing empty component left by a terminating `;`.
pub fn composite(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').filter(|part| !part.is_empty())
}

/// A reference value of the form `lot;subset;TYPE;id`. Only the last two
/// components identify the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef<'a> {
    /// Target block type, e.g. `PNO`, `PAR`, `PFE`, `FEA`, `OBJ`, `ASS`
    pub ty: &'a str,
    pub id: &'a str,
}

impl<'a> ObjectRef<'a> {
    pub fn parse(value: &'a str) -> Option<Self> {
        let mut parts: Vec<&str> = composite(value).collect();
        let id = parts.pop()?;
        let ty = parts.pop()?;
        Some(Self { ty, id })
    }
}

/// Parse one `COR` coordinate tuple: `+x;+y;` with an optional `;+z`.
pub fn parse_point(value: &str) -> Option<(f64, f64, Option<f64>)> {
    let mut parts = composite(value).map(|p| p.trim().parse::<f64>().ok());
    let x = parts.next()??;
    let y = parts.next()??;
    let z = parts.next().flatten();
    Some((x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_tagged_records() {
        let input = "RTYSA03:PNO\r\nRIDSA06:Nod_01\nCORCC22:+876249.35;+6247590.1\n";
        let fields: Vec<_> = Scanner::new("T1.VEC", input)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(fields[0], Field { tag: "RTY", value: "PNO" });
        assert_eq!(fields[1], Field { tag: "RID", value: "Nod_01" });
        assert_eq!(fields[2].value, "+876249.35;+6247590.1");
    }

    #[test]
    fn tolerates_empty_lines_and_trailing_whitespace() {
        let input = "RTYSA03:PNO   \r\n\n   \nRIDSA06:Nod_01\n";
        let fields: Vec<_> = Scanner::new("T1.VEC", input)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].value, "PNO");
    }

    #[test]
    fn declared_length_wins_over_padding() {
        // Value length 3 with trailing junk after the declared width.
        let fields: Vec<_> = Scanner::new("x", "RTYSA03:PNOxx\n")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(fields[0].value, "PNO");
    }

    #[test]
    fn unknown_tags_are_passed_through() {
        let fields: Vec<_> = Scanner::new("x", "ZZZSA02:ok\n")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(fields[0], Field { tag: "ZZZ", value: "ok" });
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Scanner::new("x", "nope\n").next().unwrap().is_err());
        assert!(Scanner::new("x", "AB:x\n").next().unwrap().is_err());
    }

    #[test]
    fn groups_blocks_by_rty() {
        let input = "BOMT 12:header junk\nRTYSA03:PNO\nRIDSA06:Nod_01\nRTYSA03:PAR\nRIDSA06:Arc_01\n";
        let blocks = blocks("x", input).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].ty, "PNO");
        assert_eq!(blocks[0].id(), Some("Nod_01"));
        assert_eq!(blocks[1].ty, "PAR");
    }

    #[test]
    fn parses_references_and_points() {
        let r = ObjectRef::parse("SeSD;Ob_E_1;OBJ;COMMUNE_id").unwrap();
        assert_eq!(r.ty, "OBJ");
        assert_eq!(r.id, "COMMUNE_id");
        assert_eq!(
            parse_point("+876249.35;+6247590.18;"),
            Some((876249.35, 6247590.18, None))
        );
        assert_eq!(
            parse_point("+1.0;+2.0;+3.0;"),
            Some((1.0, 2.0, Some(3.0)))
        );
        assert_eq!(parse_point("+1.0;"), None);
    }
}
