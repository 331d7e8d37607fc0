use tantivy::tokenizer::{Token, TokenStream, Tokenizer};

/// Tokenizer that indexes each CJK character plus CJK bigrams, and
/// lowercased alphanumeric words for everything else.
#[derive(Clone)]
pub struct CjkTokenizer;

pub const CJK_TOKENIZER: &str = "cjk";

impl Tokenizer for CjkTokenizer {
    type TokenStream<'a> = CjkTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        CjkTokenStream {
            tokens: tokenize(text),
            index: 0,
            token: Token::default(),
        }
    }
}

pub fn is_cjk_char(c: char) -> bool {
    let cp = c as u32;
    (0x4E00..=0x9FFF).contains(&cp)       // CJK Unified Ideographs
        || (0xAC00..=0xD7AF).contains(&cp) // Hangul Syllables
        || (0x1100..=0x11FF).contains(&cp) // Hangul Jamo
        || (0x3130..=0x318F).contains(&cp) // Hangul Compatibility Jamo
        || (0x30A0..=0x30FF).contains(&cp) // Katakana
        || (0x3040..=0x309F).contains(&cp) // Hiragana
        || (0x3400..=0x4DBF).contains(&cp) // Extension A
        || (0x20000..=0x2A6DF).contains(&cp) // Extension B
}

struct TokenData {
    text: String,
    offset_from: usize,
    offset_to: usize,
}

fn tokenize(text: &str) -> Vec<TokenData> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (start, ch) = chars[i];
        if is_cjk_char(ch) {
            let end = start + ch.len_utf8();
            tokens.push(TokenData {
                text: ch.to_lowercase().collect(),
                offset_from: start,
                offset_to: end,
            });
            if let Some(&(_, next)) = chars.get(i + 1).filter(|(_, c)| is_cjk_char(*c)) {
                tokens.push(TokenData {
                    text: format!("{}{}", ch, next).to_lowercase(),
                    offset_from: start,
                    offset_to: end + next.len_utf8(),
                });
            }
            i += 1;
        } else if ch.is_alphanumeric() {
            let mut end = start;
            while i < chars.len() && chars[i].1.is_alphanumeric() && !is_cjk_char(chars[i].1) {
                end = chars[i].0 + chars[i].1.len_utf8();
                i += 1;
            }
            tokens.push(TokenData {
                text: text[start..end].to_lowercase(),
                offset_from: start,
                offset_to: end,
            });
        } else {
            i += 1;
        }
    }

    tokens
}

pub struct CjkTokenStream {
    tokens: Vec<TokenData>,
    index: usize,
    token: Token,
}

impl TokenStream for CjkTokenStream {
    fn advance(&mut self) -> bool {
        let Some(data) = self.tokens.get(self.index) else {
            return false;
        };
        self.token = Token {
            offset_from: data.offset_from,
            offset_to: data.offset_to,
            position: self.index,
            text: data.text.clone(),
            position_length: 1,
        };
        self.index += 1;
        true
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}

/// Excerpt of `text` around the first query term, at most `max_len` chars.
pub fn extract_snippet(text: &str, query: &str, max_len: usize) -> String {
    let text_lower = text.to_lowercase();
    let first_hit = query
        .split_whitespace()
        .filter_map(|term| text_lower.find(&term.to_lowercase()))
        .min();

    let Some(byte_pos) = first_hit else {
        return text.chars().take(max_len).collect();
    };

    // Lowercasing can shift byte offsets; count chars on the lowered text.
    let char_pos = text_lower[..byte_pos].chars().count();
    let start = char_pos.saturating_sub(max_len / 3);
    let snippet: String = text.chars().skip(start).take(max_len).collect();
    if start > 0 {
        format!("...{}", snippet.trim())
    } else {
        snippet.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        tokenize(input).into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_latin_words_lowercased() {
        assert_eq!(texts("Hello, World 42"), vec!["hello", "world", "42"]);
    }

    #[test]
    fn test_cjk_unigrams_and_bigrams() {
        assert_eq!(texts("회의록"), vec!["회", "회의", "의", "의록", "록"]);
    }

    #[test]
    fn test_mixed_script_offsets() {
        let tokens = tokenize("ab한");
        assert_eq!(tokens[0].text, "ab");
        assert_eq!((tokens[1].offset_from, tokens[1].offset_to), (2, 5));
    }

    #[test]
    fn test_snippet_centers_on_match() {
        let text = format!("{} needle tail", "x".repeat(200));
        let snippet = extract_snippet(&text, "NEEDLE", 60);
        assert!(snippet.starts_with("..."));
        assert!(snippet.contains("needle"));
        assert_eq!(extract_snippet("short text", "missing", 5), "short");
    }
}
