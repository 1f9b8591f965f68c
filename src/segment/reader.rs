//! Immutable segment reader
//!
//! A segment is one little-endian file:
//!
//! ```text
//! [header: 128 bytes][entries][strings][fst][postings][docs][crc32: 4 bytes]
//! ```
//!
//! The header carries the segment identity, the posting profile, the
//! dictionary kind, corpus counters and the `(offset, length)` of every
//! section. The trailer is a CRC32 over everything before it. Readers work
//! over owned bytes or a read-only memory map without copying sections.

use std::ops::Range;
use std::sync::Arc;

use memmap2::Mmap;

use crate::config::{DictionaryKind, PostingProfile};
use crate::error::{FtsError, Result};

use super::postings::PostingView;
use super::statistics::SegmentStatistics;
use super::term_dict::{TermDictionary, TermEntry, TERM_ENTRY_BYTES};
use super::types::{read_u32, read_u64, DocId, SegmentId};

pub const SEGMENT_MAGIC: &[u8; 8] = b"FTSSEG01";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_BYTES: usize = 128;
pub const TRAILER_BYTES: usize = 4;

pub const SECTION_ENTRIES: usize = 0;
pub const SECTION_STRINGS: usize = 1;
pub const SECTION_FST: usize = 2;
pub const SECTION_POSTINGS: usize = 3;
pub const SECTION_DOCS: usize = 4;
pub const SECTION_COUNT: usize = 5;

const SECTIONS_AT: usize = 48;

/// Backing storage of a segment
#[derive(Clone)]
pub enum SegmentBytes {
    Owned(Arc<Vec<u8>>),
    Mapped(Arc<Mmap>),
}

impl SegmentBytes {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, SegmentBytes::Mapped(_))
    }
}

impl AsRef<[u8]> for SegmentBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            SegmentBytes::Owned(bytes) => bytes.as_slice(),
            SegmentBytes::Mapped(map) => &map[..],
        }
    }
}

impl From<Vec<u8>> for SegmentBytes {
    fn from(bytes: Vec<u8>) -> Self {
        SegmentBytes::Owned(Arc::new(bytes))
    }
}

/// A sub-range of segment bytes that keeps the backing storage alive
#[derive(Clone)]
pub struct ByteSlice {
    bytes: SegmentBytes,
    start: usize,
    end: usize,
}

impl ByteSlice {
    pub fn new(bytes: SegmentBytes, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= bytes.len());
        Self { bytes, start, end }
    }
}

impl AsRef<[u8]> for ByteSlice {
    fn as_ref(&self) -> &[u8] {
        &self.bytes.as_ref()[self.start..self.end]
    }
}

/// Location of one section inside the file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Section {
    pub offset: u64,
    pub len: u64,
}

/// Fixed-size segment header
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentHeader {
    pub id: SegmentId,
    pub profile: PostingProfile,
    pub dictionary: DictionaryKind,
    pub doc_count: u32,
    pub term_count: u32,
    pub total_doc_length: u64,
    pub sections: [Section; SECTION_COUNT],
}

impl SegmentHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(SEGMENT_MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.push(self.profile.tag());
        out.push(self.dictionary.tag());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&self.doc_count.to_le_bytes());
        out.extend_from_slice(&self.term_count.to_le_bytes());
        out.extend_from_slice(&self.total_doc_length.to_le_bytes());
        out.extend_from_slice(&self.id.generation.to_le_bytes());
        out.extend_from_slice(&self.id.sequence.to_le_bytes());
        out.push(self.id.level);
        out.extend_from_slice(&[0u8; 7]);
        for section in &self.sections {
            out.extend_from_slice(&section.offset.to_le_bytes());
            out.extend_from_slice(&section.len.to_le_bytes());
        }
        out.resize(start + HEADER_BYTES, 0);
    }

    /// Decode a header; the error is a human-readable reason
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_BYTES {
            return Err(format!("file too short ({} bytes)", bytes.len()));
        }
        if &bytes[..8] != SEGMENT_MAGIC {
            return Err("bad magic".into());
        }
        let version = read_u32(bytes, 8);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", version));
        }
        let profile = PostingProfile::from_tag(bytes[12])
            .ok_or_else(|| format!("unknown posting profile {}", bytes[12]))?;
        let dictionary = DictionaryKind::from_tag(bytes[13])
            .ok_or_else(|| format!("unknown dictionary kind {}", bytes[13]))?;

        let mut sections = [Section::default(); SECTION_COUNT];
        for (i, section) in sections.iter_mut().enumerate() {
            let at = SECTIONS_AT + i * 16;
            section.offset = read_u64(bytes, at);
            section.len = read_u64(bytes, at + 8);
        }

        Ok(Self {
            id: SegmentId::new(read_u32(bytes, 32), bytes[40], read_u32(bytes, 36)),
            profile,
            dictionary,
            doc_count: read_u32(bytes, 16),
            term_count: read_u32(bytes, 20),
            total_doc_length: read_u64(bytes, 24),
            sections,
        })
    }
}

/// Encode the document table: ids, lengths, then bincode keys
pub fn encode_docs(stats: &SegmentStatistics, out: &mut Vec<u8>) -> Result<()> {
    for id in stats.doc_ids() {
        out.extend_from_slice(&id.to_le_bytes());
    }
    for len in stats.doc_lengths() {
        out.extend_from_slice(&len.to_le_bytes());
    }
    bincode::serialize_into(out, stats.keys())?;
    Ok(())
}

fn decode_docs(bytes: &[u8], doc_count: usize) -> std::result::Result<SegmentStatistics, String> {
    let columns = doc_count * 8;
    if bytes.len() < columns {
        return Err("document table truncated".into());
    }
    let doc_ids: Vec<DocId> = (0..doc_count).map(|i| read_u32(bytes, i * 4)).collect();
    let doc_lengths: Vec<u32> = (0..doc_count)
        .map(|i| read_u32(bytes, doc_count * 4 + i * 4))
        .collect();
    let keys: Vec<String> =
        bincode::deserialize(&bytes[columns..]).map_err(|e| format!("document keys: {}", e))?;

    if keys.len() != doc_count {
        return Err("document key count does not match header".into());
    }
    if !doc_ids.windows(2).all(|w| w[0] < w[1]) {
        return Err("document ids are not strictly increasing".into());
    }
    Ok(SegmentStatistics::from_columns(doc_ids, doc_lengths, keys))
}

/// Immutable, searchable segment
pub struct SegmentReader {
    header: SegmentHeader,
    bytes: SegmentBytes,
    dictionary: TermDictionary,
    stats: SegmentStatistics,
    ranges: [Range<usize>; SECTION_COUNT],
}

impl SegmentReader {
    /// Open a segment, validating its header, checksum and sections
    ///
    /// `label` names the segment in errors (usually its file name).
    pub fn open(bytes: SegmentBytes, label: &str) -> Result<Self> {
        let corrupt = |reason: String| FtsError::corrupt(label, reason);
        let data = bytes.as_ref();

        let header = SegmentHeader::decode(data).map_err(corrupt)?;
        if data.len() < HEADER_BYTES + TRAILER_BYTES {
            return Err(corrupt("missing checksum".into()));
        }
        let body_end = data.len() - TRAILER_BYTES;
        let expected = read_u32(data, body_end);
        let actual = crc32fast::hash(&data[..body_end]);
        if expected != actual {
            return Err(corrupt(format!(
                "checksum mismatch (stored {:08x}, computed {:08x})",
                expected, actual
            )));
        }

        let mut ranges: [Range<usize>; SECTION_COUNT] = Default::default();
        for (i, section) in header.sections.iter().enumerate() {
            let start = section.offset as usize;
            let end = start
                .checked_add(section.len as usize)
                .filter(|&end| start >= HEADER_BYTES && end <= body_end)
                .ok_or_else(|| corrupt(format!("section {} out of bounds", i)))?;
            ranges[i] = start..end;
        }

        let term_count = header.term_count as usize;
        if ranges[SECTION_ENTRIES].len() != term_count * TERM_ENTRY_BYTES {
            return Err(corrupt("term entry table size mismatch".into()));
        }
        Self::validate_strings(&data[ranges[SECTION_STRINGS].clone()], term_count)
            .map_err(corrupt)?;

        let stats = decode_docs(&data[ranges[SECTION_DOCS].clone()], header.doc_count as usize)
            .map_err(corrupt)?;
        if stats.total_doc_length() != header.total_doc_length {
            return Err(corrupt("total document length mismatch".into()));
        }

        let mut reader = Self {
            header,
            bytes,
            dictionary: TermDictionary::Hash(Default::default()),
            stats,
            ranges,
        };
        reader.dictionary = match reader.header.dictionary {
            DictionaryKind::Fst => {
                let range = reader.ranges[SECTION_FST].clone();
                let slice = ByteSlice::new(reader.bytes.clone(), range.start, range.end);
                let dict = TermDictionary::open_fst(slice)
                    .map_err(|e| corrupt(format!("term dictionary: {}", e)))?;
                if dict.len() != term_count {
                    return Err(corrupt("dictionary size does not match term count".into()));
                }
                dict
            }
            DictionaryKind::Hash => {
                TermDictionary::from_terms((0..term_count).map(|ordinal| reader.term(ordinal)))
            }
        };
        Ok(reader)
    }

    fn validate_strings(bytes: &[u8], term_count: usize) -> std::result::Result<(), String> {
        let table = (term_count + 1) * 4;
        if bytes.len() < table {
            return Err("term string table truncated".into());
        }
        let text = &bytes[table..];
        let mut previous = 0usize;
        for i in 0..=term_count {
            let offset = read_u32(bytes, i * 4) as usize;
            if offset < previous || offset > text.len() {
                return Err("term string offsets out of order".into());
            }
            previous = offset;
        }
        if previous != text.len() {
            return Err("term string table has trailing bytes".into());
        }
        std::str::from_utf8(text).map_err(|_| "term strings are not UTF-8".to_string())?;
        Ok(())
    }

    fn section(&self, index: usize) -> &[u8] {
        &self.bytes.as_ref()[self.ranges[index].clone()]
    }

    pub fn id(&self) -> SegmentId {
        self.header.id
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn profile(&self) -> PostingProfile {
        self.header.profile
    }

    pub fn dictionary_kind(&self) -> DictionaryKind {
        self.header.dictionary
    }

    pub fn doc_count(&self) -> u32 {
        self.header.doc_count
    }

    pub fn term_count(&self) -> u32 {
        self.header.term_count
    }

    pub fn total_doc_length(&self) -> u64 {
        self.header.total_doc_length
    }

    pub fn avgdl(&self) -> f64 {
        self.stats.avgdl()
    }

    /// Document table of this segment
    pub fn stats(&self) -> &SegmentStatistics {
        &self.stats
    }

    pub fn get_key(&self, doc_id: DocId) -> Option<&str> {
        self.stats.get_key(doc_id)
    }

    pub fn get_doc_length(&self, doc_id: DocId) -> Option<u32> {
        self.stats.get_doc_length(doc_id)
    }

    /// Term string for an ordinal (validated as UTF-8 on open)
    pub fn term(&self, ordinal: usize) -> &str {
        let strings = self.section(SECTION_STRINGS);
        let table = (self.header.term_count as usize + 1) * 4;
        let start = read_u32(strings, ordinal * 4) as usize;
        let end = read_u32(strings, ordinal * 4 + 4) as usize;
        std::str::from_utf8(&strings[table + start..table + end]).unwrap_or_default()
    }

    /// Term entry for an ordinal
    pub fn entry(&self, ordinal: usize) -> TermEntry {
        let at = ordinal * TERM_ENTRY_BYTES;
        TermEntry::decode(&self.section(SECTION_ENTRIES)[at..at + TERM_ENTRY_BYTES])
    }

    /// Look up a term's entry
    pub fn lookup(&self, term: &str) -> Option<TermEntry> {
        let ordinal = self.dictionary.get(term)? as usize;
        (ordinal < self.header.term_count as usize).then(|| self.entry(ordinal))
    }

    /// Document frequency of a term in this segment
    pub fn doc_frequency(&self, term: &str) -> u32 {
        self.lookup(term).map_or(0, |e| e.doc_freq)
    }

    /// Posting list of a term entry
    pub fn postings_for(&self, entry: &TermEntry) -> Result<PostingView<'_>> {
        let postings = self.section(SECTION_POSTINGS);
        let start = entry.posting_offset as usize;
        let bytes = start
            .checked_add(entry.posting_len as usize)
            .and_then(|end| postings.get(start..end))
            .ok_or_else(|| {
                FtsError::corrupt(self.header.id.file_name(), "posting list out of bounds")
            })?;
        PostingView::parse(bytes)
            .map_err(|e| FtsError::corrupt(self.header.id.file_name(), e.to_string()))
    }

    /// Posting list of a term, if present
    pub fn postings(&self, term: &str) -> Result<Option<PostingView<'_>>> {
        match self.lookup(term) {
            Some(entry) => self.postings_for(&entry).map(Some),
            None => Ok(None),
        }
    }

    /// Iterate `(term, entry)` in term order
    pub fn terms(&self) -> impl Iterator<Item = (&str, TermEntry)> + '_ {
        (0..self.header.term_count as usize).map(move |i| (self.term(i), self.entry(i)))
    }

    /// File size in bytes
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_mapped(&self) -> bool {
        self.bytes.is_mapped()
    }

    /// Approximate heap usage; mapped bytes are not counted
    pub fn memory_bytes(&self) -> usize {
        let docs = self.stats.doc_count() as usize * 8
            + self.stats.keys().iter().map(|k| k.len()).sum::<usize>();
        let dictionary = match self.dictionary {
            TermDictionary::Hash(_) => self.dictionary.memory_bytes(),
            TermDictionary::Fst(_) => 0,
        };
        let owned = if self.is_mapped() { 0 } else { self.bytes.len() };
        docs + dictionary + owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, TokenizerConfig};
    use crate::segment::buffer::MutableBuffer;
    use crate::segment::writer::SegmentWriter;
    use crate::tokenizer::Tokenizer;

    fn segment_bytes(profile: PostingProfile, dictionary: DictionaryKind) -> Vec<u8> {
        let tokenizer = Tokenizer::new(&TokenizerConfig::default());
        let mut buffer = MutableBuffer::new();
        for (id, text) in ["the cat sat", "the cat ran", "a dog ran"].iter().enumerate() {
            let (tokens, len) = tokenizer.tokens(text);
            buffer.index_document(id as DocId, format!("{}", id + 1), tokens, len);
        }
        let config = EngineConfig::default()
            .with_profile(profile)
            .with_dictionary(dictionary);
        SegmentWriter::new(SegmentId::new(1, 0, 7), &config)
            .write_buffer(&buffer)
            .unwrap()
    }

    #[test]
    fn test_open_and_lookup() {
        for dictionary in [DictionaryKind::Fst, DictionaryKind::Hash] {
            let bytes = segment_bytes(PostingProfile::Balanced, dictionary);
            let reader = SegmentReader::open(bytes.into(), "test").unwrap();

            assert_eq!(reader.id(), SegmentId::new(1, 0, 7));
            assert_eq!(reader.doc_count(), 3);
            assert_eq!(reader.dictionary_kind(), dictionary);
            assert_eq!(reader.doc_frequency("cat"), 2);
            assert_eq!(reader.doc_frequency("unicorn"), 0);

            let view = reader.postings("ran").unwrap().unwrap();
            let docs: Vec<_> = view.iter().map(|p| p.doc_id).collect();
            assert_eq!(docs, vec![1, 2]);
            assert_eq!(reader.get_key(2), Some("3"));
        }
    }

    #[test]
    fn test_terms_are_sorted() {
        let bytes = segment_bytes(PostingProfile::Speed, DictionaryKind::Fst);
        let reader = SegmentReader::open(bytes.into(), "test").unwrap();
        let terms: Vec<_> = reader.terms().map(|(t, _)| t.to_string()).collect();
        assert_eq!(terms, vec!["a", "cat", "dog", "ran", "sat", "the"]);
    }

    #[test]
    fn test_detects_corruption() {
        let mut bytes = segment_bytes(PostingProfile::Compact, DictionaryKind::Fst);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = SegmentReader::open(bytes.into(), "seg_1_0_7.fts").err().unwrap();
        assert!(matches!(err, FtsError::Corrupt { .. }));

        let err = SegmentReader::open(vec![0u8; 16].into(), "short").err().unwrap();
        assert!(matches!(err, FtsError::Corrupt { .. }));
    }

    #[test]
    fn test_header_encoding() {
        let header = SegmentHeader {
            id: SegmentId::new(2, 1, 9),
            profile: PostingProfile::Compact,
            dictionary: DictionaryKind::Hash,
            doc_count: 10,
            term_count: 4,
            total_doc_length: 99,
            sections: [Section { offset: 128, len: 5 }; SECTION_COUNT],
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        assert_eq!(out.len(), HEADER_BYTES);
        assert_eq!(SegmentHeader::decode(&out).unwrap(), header);
    }
}
