use tantivy::schema::{IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TOKENIZER_NAME: &str = "text_with_stopwords";

pub const FIELD_ID: &str = "id";
pub const FIELD_SOURCE_PATH: &str = "source_path";
pub const FIELD_POSITION: &str = "position";
pub const FIELD_KIND: &str = "kind";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_METADATA: &str = "metadata";

/// Only `text` is tokenized; every field is stored so a hit carries the
/// full chunk payload.
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field(FIELD_ID, STRING | STORED);
    schema_builder.add_text_field(FIELD_SOURCE_PATH, STRING | STORED);
    schema_builder.add_u64_field(FIELD_POSITION, NumericOptions::default().set_stored());
    schema_builder.add_text_field(FIELD_KIND, STRING | STORED);
    let text_field_indexing = TextFieldIndexing::default()
        .set_tokenizer(TOKENIZER_NAME)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
    schema_builder.add_text_field(FIELD_TEXT, text_options);
    schema_builder.add_text_field(FIELD_METADATA, STORED);
    schema_builder.build()
}

/// Tokenizers are not persisted with the index; register on every open.
pub fn register_tokenizer(index: &Index) {
    let stop_words = [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on", "that",
        "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there", "then", "than",
        "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could", "should", "would",
        "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
    ];
    let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
        .build();
    index.tokenizers().register(TOKENIZER_NAME, tokenizer);
}
