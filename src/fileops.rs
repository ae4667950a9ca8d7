//! Sentence/word tokenization, serialization and in-place editing for the
//! plain-text files a storage server holds.
//!
//! A file's content is a sequence of [`Sentence`]s, each a sequence of
//! [`Token`]s. Tokens are never merged or trimmed: a run of spaces/tabs/`\r`
//! is one [`Token::Space`] token carrying its exact bytes, a newline is its
//! own [`Token::Newline`] token, and `.`/`!`/`?` are [`Token::Delimiter`]
//! tokens that close the sentence they appear in. Everything else accumulates
//! into a [`Token::Word`]. This is what lets [`serialize`] reproduce the
//! original spacing of a parsed file rather than re-flowing it.

use std::path::{Path, PathBuf};

/// Characters that end a sentence.
pub fn is_delimiter(c: char) -> bool {
    c == '.' || c == '!' || c == '?'
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Word(String),
    /// One or more consecutive space/tab/`\r` characters, verbatim.
    Space(String),
    Newline,
    Delimiter(char),
}

impl Token {
    fn is_space(&self) -> bool {
        matches!(self, Token::Space(_))
    }

    fn is_newline(&self) -> bool {
        matches!(self, Token::Newline)
    }

    fn is_delimiter(&self) -> bool {
        matches!(self, Token::Delimiter(_))
    }

    /// Whether this token counts as a "real word" for 1-based word indexing:
    /// everything except whitespace and newline tokens, so delimiters are
    /// indexable words in their own right.
    fn counts_for_indexing(&self) -> bool {
        !self.is_space() && !self.is_newline()
    }

    fn text(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Space(s) => s.clone(),
            Token::Newline => "\n".to_string(),
            Token::Delimiter(c) => c.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sentence {
    pub tokens: Vec<Token>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileContent {
    pub sentences: Vec<Sentence>,
}

/// Splits `text` into tokens: runs of space/tab/`\r` collapse into one
/// [`Token::Space`], each `\n` is its own [`Token::Newline`], each delimiter
/// is its own [`Token::Delimiter`], everything else accumulates into a
/// [`Token::Word`]. Used both to tokenize a whole file and to tokenize text
/// a client wants inserted mid-sentence.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ' ' || c == '\t' || c == '\r' {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
            let mut run = String::new();
            run.push(c);
            while matches!(chars.peek(), Some(&n) if n == ' ' || n == '\t' || n == '\r') {
                run.push(chars.next().unwrap());
            }
            tokens.push(Token::Space(run));
        } else if c == '\n' {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
            tokens.push(Token::Newline);
        } else if is_delimiter(c) {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
            tokens.push(Token::Delimiter(c));
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

/// Parses file content into sentences. A delimiter closes the sentence it
/// appears in (as that sentence's last token) and opens a new one; a newline
/// does not close a sentence. A trailing sentence with no tokens is dropped,
/// so an empty file parses to zero sentences.
pub fn parse_content(text: &str) -> FileContent {
    let mut sentences = Vec::new();
    let mut current = Sentence::default();

    for tok in tokenize(text) {
        let closes = tok.is_delimiter();
        current.tokens.push(tok);
        if closes {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.tokens.is_empty() {
        sentences.push(current);
    }

    FileContent { sentences }
}

/// Serializes content back to text.
///
/// Within a sentence, a space is inserted between two adjacent tokens only
/// when both are ordinary words; a space/newline/delimiter token on either
/// side suppresses it. Between two sentences, a space is added unless the
/// first sentence's last token is a newline or space token; this rule does
/// *not* exempt a trailing delimiter, so content like `"A.B"` round-trips as
/// `"A. B"` rather than `"A.B"`.
pub fn serialize(fc: &FileContent) -> String {
    let mut out = String::new();
    let n = fc.sentences.len();

    for (i, sentence) in fc.sentences.iter().enumerate() {
        let toks = &sentence.tokens;
        for (j, tok) in toks.iter().enumerate() {
            out.push_str(&tok.text());
            if j + 1 < toks.len() {
                let next = &toks[j + 1];
                if tok.is_space() || next.is_space() || tok.is_newline() || next.is_newline() {
                    continue;
                }
                if tok.is_delimiter() || next.is_delimiter() {
                    continue;
                }
                out.push(' ');
            }
        }

        if i + 1 < n {
            if let Some(last) = toks.last() {
                if !last.is_newline() && !last.is_space() {
                    match fc.sentences[i + 1].tokens.first() {
                        Some(first_next) if first_next.is_space() || first_next.is_newline() => {}
                        Some(_) => out.push(' '),
                        None => out.push(' '),
                    }
                }
            }
        }
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpsError {
    InvalidSentenceIndex,
    InvalidWordIndex,
}

fn real_word_count(tokens: &[Token]) -> usize {
    tokens.iter().filter(|t| t.counts_for_indexing()).count()
}

/// Position within `tokens` that the 1-based real-word index `word_idx`
/// refers to: the slot right before that word, or right after the last real
/// word when `word_idx` is one past the end (an append).
fn actual_insert_index(tokens: &[Token], word_idx: usize) -> usize {
    if word_idx == 1 {
        return 0;
    }
    let mut seen = 0;
    for (i, t) in tokens.iter().enumerate() {
        if t.counts_for_indexing() {
            seen += 1;
            if seen == word_idx - 1 {
                return i + 1;
            }
        }
    }
    tokens.len()
}

/// Inserts `word` at `word_idx` (1-based, over real words) within sentence
/// `sent_idx`. `sent_idx == fc.sentences.len()` appends a brand new sentence.
/// `word` is itself re-tokenized, so embedded delimiters split the target
/// sentence: a delimiter inside the inserted text ends the sentence at that
/// point, and any trailing non-delimiter content continues in a fresh
/// sentence immediately after. Returns the number of new sentences created.
pub fn insert_word_in_sentence(
    fc: &mut FileContent,
    sent_idx: usize,
    word_idx: usize,
    word: &str,
) -> Result<usize, FileOpsError> {
    if sent_idx > fc.sentences.len() {
        return Err(FileOpsError::InvalidSentenceIndex);
    }
    if sent_idx == fc.sentences.len() {
        fc.sentences.push(Sentence::default());
    }

    let real_count = real_word_count(&fc.sentences[sent_idx].tokens);
    if word_idx < 1 || word_idx > real_count + 1 {
        return Err(FileOpsError::InvalidWordIndex);
    }

    let parts = tokenize(word);
    if parts.is_empty() {
        return Ok(0);
    }

    // Every delimiter in the inserted content closes a sentence and opens a
    // new one, same as parsing a whole file (§8: "k internal delimiters
    // creates k new sentences"). The target sentence's tail — whatever sat
    // after the insertion point before this call — is detached once up
    // front and reattached after the last content part, so it ends up in
    // the final sentence this insert produces rather than being split
    // across every intermediate one.
    let new_sentences = parts.iter().filter(|t| t.is_delimiter()).count();

    let actual_idx = actual_insert_index(&fc.sentences[sent_idx].tokens, word_idx);
    let original_tail = fc.sentences[sent_idx].tokens.split_off(actual_idx);

    if new_sentences > 0 {
        let empties = (0..new_sentences).map(|_| Sentence::default());
        fc.sentences.splice(sent_idx + 1..sent_idx + 1, empties);
    }

    let mut cur_sent_idx = sent_idx;
    for part in parts {
        let is_delim = part.is_delimiter();
        fc.sentences[cur_sent_idx].tokens.push(part);
        if is_delim {
            cur_sent_idx += 1;
        }
    }
    fc.sentences[cur_sent_idx].tokens.extend(original_tail);

    Ok(new_sentences)
}

/// Converts literal backslash escapes (`\n`, `\t`, `\r`, `\\`, `\'`, `\"`,
/// `\0`) in client-supplied content to their byte meanings. An unrecognized
/// `\x` keeps `x` verbatim (the backslash is dropped).
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Counts every character and every run of non-whitespace, non-delimiter
/// characters (a "word"); a delimiter ends the word before it but is not
/// itself counted.
pub fn compute_stats(text: &str) -> (usize, usize) {
    let char_count = text.chars().count();
    let mut word_count = 0;
    let mut in_word = false;

    for c in text.chars() {
        if c == ' ' || c == '\t' || c == '\n' || c == '\r' || is_delimiter(c) {
            if in_word {
                word_count += 1;
                in_word = false;
            }
        } else {
            in_word = true;
        }
    }
    if in_word {
        word_count += 1;
    }

    (word_count, char_count)
}

/// §4.8: whether `idx` is a valid sentence index to lock against `fc`.
///
/// A zero-sentence file only accepts `idx == 0` (locking into a file that
/// doesn't exist yet, or was truncated to empty). Otherwise `idx` may reach
/// one past the last sentence only if that last sentence is "complete" —
/// ends in a delimiter or a newline — since that is the only case
/// `insert_word_in_sentence`'s append-a-new-sentence path is meant to serve.
pub fn lock_index_valid(fc: &FileContent, idx: usize) -> bool {
    let count = fc.sentences.len();
    if count == 0 {
        return idx == 0;
    }
    if idx > count {
        return false;
    }
    if idx < count {
        return true;
    }
    match fc.sentences[count - 1].tokens.last() {
        Some(t) => t.is_delimiter() || t.is_newline(),
        None => false,
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// The `.undo` sidecar path for `path` (the full filename with `.undo`
/// appended, not an extension swap — `notes.txt` backs up to
/// `notes.txt.undo`, not `notes.undo`).
pub fn undo_path(path: &Path) -> PathBuf {
    sidecar_path(path, ".undo")
}

fn checkpoint_path(path: &Path, tag: &str) -> PathBuf {
    sidecar_path(path, &format!(".checkpoint_{tag}"))
}

pub async fn read_and_parse(path: &Path) -> std::io::Result<FileContent> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_content(&text))
}

pub async fn write_content(path: &Path, fc: &FileContent) -> std::io::Result<()> {
    tokio::fs::write(path, serialize(fc)).await
}

pub async fn file_stats(path: &Path) -> std::io::Result<(usize, usize)> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(compute_stats(&text))
}

/// One level of undo: copies `path` to a `.undo` sidecar, overwriting any
/// previous backup.
pub async fn create_undo_backup(path: &Path) -> std::io::Result<()> {
    let contents = tokio::fs::read(path).await?;
    tokio::fs::write(undo_path(path), contents).await
}

/// Restores `path` from its `.undo` sidecar and removes the sidecar.
/// Returns `false` without touching `path` if no backup exists.
pub async fn restore_from_undo(path: &Path) -> std::io::Result<bool> {
    let backup = undo_path(path);
    if tokio::fs::metadata(&backup).await.is_err() {
        return Ok(false);
    }
    let contents = tokio::fs::read(&backup).await?;
    tokio::fs::write(path, contents).await?;
    tokio::fs::remove_file(&backup).await?;
    Ok(true)
}

pub async fn undo_backup_exists(path: &Path) -> bool {
    tokio::fs::metadata(undo_path(path)).await.is_ok()
}

#[derive(Debug)]
pub enum CheckpointError {
    AlreadyExists,
    NotFound,
    Io(std::io::Error),
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

pub async fn create_checkpoint(path: &Path, tag: &str) -> Result<(), CheckpointError> {
    let cp = checkpoint_path(path, tag);
    if tokio::fs::metadata(&cp).await.is_ok() {
        return Err(CheckpointError::AlreadyExists);
    }
    let contents = tokio::fs::read(path)
        .await
        .map_err(|_| CheckpointError::NotFound)?;
    tokio::fs::write(&cp, contents).await?;
    Ok(())
}

pub async fn list_checkpoints(path: &Path) -> std::io::Result<Vec<String>> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
    let prefix = format!("{filename}.checkpoint_");

    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if let Some(tag) = name.strip_prefix(&prefix) {
                out.push(tag.to_string());
            }
        }
    }
    Ok(out)
}

pub async fn view_checkpoint(path: &Path, tag: &str) -> Result<String, CheckpointError> {
    let cp = checkpoint_path(path, tag);
    tokio::fs::read_to_string(&cp)
        .await
        .map_err(|_| CheckpointError::NotFound)
}

/// Reverts `path` to the content of checkpoint `tag`, taking a fresh undo
/// backup of the pre-revert content first (best-effort: a backup failure
/// does not block the revert).
pub async fn revert_to_checkpoint(path: &Path, tag: &str) -> Result<(), CheckpointError> {
    let cp = checkpoint_path(path, tag);
    if tokio::fs::metadata(&cp).await.is_err() {
        return Err(CheckpointError::NotFound);
    }
    let _ = create_undo_backup(path).await;
    let contents = tokio::fs::read(&cp).await?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_has_zero_sentences() {
        assert_eq!(parse_content("").sentences.len(), 0);
    }

    #[test]
    fn content_with_no_delimiter_is_one_sentence() {
        let fc = parse_content("hello world");
        assert_eq!(fc.sentences.len(), 1);
    }

    #[test]
    fn delimiter_closes_sentence_and_starts_new_one() {
        let fc = parse_content("Hi. Bye!");
        assert_eq!(fc.sentences.len(), 2);
        assert_eq!(fc.sentences[0].tokens.last(), Some(&Token::Delimiter('.')));
        assert_eq!(fc.sentences[1].tokens.last(), Some(&Token::Delimiter('!')));
    }

    #[test]
    fn newline_does_not_close_a_sentence() {
        let fc = parse_content("line one\nline two.");
        assert_eq!(fc.sentences.len(), 1);
        assert!(fc.sentences[0].tokens.contains(&Token::Newline));
    }

    #[test]
    fn round_trips_simple_text() {
        let text = "The quick fox. Jumps high!\n";
        let fc = parse_content(text);
        assert_eq!(serialize(&fc), text);
    }

    #[test]
    fn missing_space_after_delimiter_is_inserted_between_sentences() {
        // between-sentence spacing does not exempt a trailing delimiter the
        // way within-sentence spacing does.
        let fc = parse_content("A.B");
        assert_eq!(serialize(&fc), "A. B");
    }

    #[test]
    fn insert_word_at_start_of_sentence() {
        let mut fc = parse_content("world.");
        insert_word_in_sentence(&mut fc, 0, 1, "hello").unwrap();
        assert_eq!(serialize(&fc), "hello world.");
    }

    #[test]
    fn insert_word_appends_past_end() {
        let mut fc = parse_content("hello.");
        insert_word_in_sentence(&mut fc, 0, 2, "world").unwrap();
        assert_eq!(serialize(&fc), "hello world.");
    }

    #[test]
    fn insert_with_embedded_delimiter_splits_sentence() {
        let mut fc = parse_content("hello world.");
        let created = insert_word_in_sentence(&mut fc, 0, 2, "there. Short").unwrap();
        assert_eq!(created, 1);
        assert_eq!(fc.sentences.len(), 2);
    }

    #[test]
    fn insert_into_new_sentence_at_end_of_file() {
        let mut fc = parse_content("");
        let created = insert_word_in_sentence(&mut fc, 0, 1, "hi").unwrap();
        assert_eq!(created, 0);
        assert_eq!(fc.sentences.len(), 1);
        assert_eq!(serialize(&fc), "hi");
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let mut fc = parse_content("hello.");
        assert_eq!(
            insert_word_in_sentence(&mut fc, 5, 1, "x"),
            Err(FileOpsError::InvalidSentenceIndex)
        );
        assert_eq!(
            insert_word_in_sentence(&mut fc, 0, 99, "x"),
            Err(FileOpsError::InvalidWordIndex)
        );
    }

    #[test]
    fn stats_count_every_char_and_skip_delimiters_as_words() {
        let (words, chars) = compute_stats("Hi there.");
        assert_eq!(chars, 9);
        assert_eq!(words, 2);
    }

    #[test]
    fn lock_validity_on_empty_file_only_accepts_zero() {
        let fc = parse_content("");
        assert!(lock_index_valid(&fc, 0));
        assert!(!lock_index_valid(&fc, 1));
    }

    #[test]
    fn lock_validity_rejects_append_past_incomplete_sentence() {
        let fc = parse_content("hello");
        assert!(lock_index_valid(&fc, 0));
        assert!(!lock_index_valid(&fc, 1));
    }

    #[test]
    fn lock_validity_accepts_append_past_complete_sentence() {
        let fc = parse_content("hello.");
        assert!(lock_index_valid(&fc, 0));
        assert!(lock_index_valid(&fc, 1));
        assert!(!lock_index_valid(&fc, 2));
    }
}
