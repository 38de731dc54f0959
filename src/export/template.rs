//! Filename Templates
//!
//! Tokens: `{orig}` (source stem), `{seq:N}` (sequence number zero-padded to
//! width N), `{date}` (capture date as `YYYY-MM-DD`, empty when missing).
//! Unknown or malformed tokens fail at parse time, before any file is
//! touched.

use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Original,
    Sequence { width: usize },
    Date,
}

/// A parsed filename template.
#[derive(Debug, Clone)]
pub struct FilenameTemplate {
    tokens: Vec<Token>,
}

impl FilenameTemplate {
    /// Parses template text, rejecting unknown tokens.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                if c == '}' {
                    return Err(Error::InvalidTemplate("unmatched '}'".to_string()));
                }
                literal.push(c);
                continue;
            }

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }

            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(Error::InvalidTemplate(format!("unclosed token '{{{name}'")));
            }

            tokens.push(Self::parse_token(&name)?);
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        if tokens.is_empty() {
            return Err(Error::InvalidTemplate("empty template".to_string()));
        }
        Ok(Self { tokens })
    }

    fn parse_token(name: &str) -> Result<Token> {
        match name {
            "orig" => Ok(Token::Original),
            "date" => Ok(Token::Date),
            _ => {
                if let Some(width_text) = name.strip_prefix("seq:") {
                    let width: usize = width_text
                        .parse()
                        .map_err(|_| Error::InvalidTemplate(format!("bad width in '{{{name}}}'")))?;
                    if width == 0 || width > 10 {
                        return Err(Error::InvalidTemplate(format!(
                            "sequence width {width} out of range"
                        )));
                    }
                    return Ok(Token::Sequence { width });
                }
                Err(Error::InvalidTemplate(format!("unknown token '{{{name}}}'")))
            }
        }
    }

    /// Expands the template for one asset. No extension is appended here.
    #[must_use]
    pub fn format(
        &self,
        original_stem: &str,
        sequence: usize,
        capture_date: Option<DateTime<Utc>>,
    ) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Original => out.push_str(original_stem),
                Token::Sequence { width } => {
                    out.push_str(&format!("{sequence:0width$}"));
                }
                Token::Date => {
                    if let Some(date) = capture_date {
                        out.push_str(&date.format("%Y-%m-%d").to_string());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tokens_expand() {
        let template = FilenameTemplate::parse("img-{seq:4}-{orig}_{date}").unwrap();
        let date = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            template.format("DSC01234", 7, Some(date)),
            "img-0007-DSC01234_2024-06-01"
        );
    }

    #[test]
    fn missing_date_expands_empty() {
        let template = FilenameTemplate::parse("{orig}{date}").unwrap();
        assert_eq!(template.format("a", 1, None), "a");
    }

    #[test]
    fn unknown_token_fails_at_parse() {
        assert!(matches!(
            FilenameTemplate::parse("{original}"),
            Err(Error::InvalidTemplate(_))
        ));
        assert!(matches!(
            FilenameTemplate::parse("{seq:}"),
            Err(Error::InvalidTemplate(_))
        ));
        assert!(matches!(
            FilenameTemplate::parse("{orig"),
            Err(Error::InvalidTemplate(_))
        ));
    }
}
