//! Feed-item documents and the index schema.

use tantivy::TantivyDocument;
use tantivy::schema::{
    FAST, Field, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder, TextFieldIndexing,
    TextOptions,
};
use tantivy::tokenizer::PreTokenizedString;

/// Typed handles to the schema fields.
#[derive(Debug, Clone)]
pub struct ItemSchema {
    pub item_id: Field,
    pub feed_id: Field,
    pub title: Field,
    pub body: Field,
    pub published: Field,
}

impl ItemSchema {
    /// Build the schema for indexing feed items.
    ///
    /// `item_id` (the item link) and `feed_id` are exact-match keys used as
    /// delete predicates. `title` and `body` carry pre-tokenized text, so
    /// their tokenizer configuration only matters for query-side parsing.
    pub fn build() -> (Schema, ItemSchema) {
        let mut builder = SchemaBuilder::default();

        let item_id = builder.add_text_field("item_id", STRING | STORED);
        let feed_id = builder.add_text_field("feed_id", STRING | STORED);

        let text_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("default")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        let title = builder.add_text_field("title", text_options.clone().set_stored());
        let body = builder.add_text_field("body", text_options);

        let published = builder.add_u64_field("published", STORED | FAST);

        let schema = builder.build();
        let item_schema = ItemSchema {
            item_id,
            feed_id,
            title,
            body,
            published,
        };

        (schema, item_schema)
    }
}

/// One unit of indexing: a feed item's identifying keys and text.
#[derive(Debug, Clone)]
pub struct ItemDocument {
    /// Key identifying the item, typically its link.
    pub item_id: String,
    /// Key identifying the owning feed, typically the feed URL.
    pub feed_id: String,
    pub title: String,
    pub body: String,
    /// Seconds since the epoch, when the item carries a date.
    pub published: Option<u64>,
}

impl ItemDocument {
    pub fn new(
        item_id: impl Into<String>,
        feed_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            feed_id: feed_id.into(),
            title: title.into(),
            body: body.into(),
            published: None,
        }
    }

    pub fn published(mut self, epoch_secs: u64) -> Self {
        self.published = Some(epoch_secs);
        self
    }

    /// Convert to a tantivy document, attaching the pre-analyzed text fields.
    pub(crate) fn into_tantivy(
        self,
        schema: &ItemSchema,
        title: PreTokenizedString,
        body: PreTokenizedString,
    ) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(schema.item_id, &self.item_id);
        doc.add_text(schema.feed_id, &self.feed_id);
        doc.add_pre_tokenized_text(schema.title, title);
        doc.add_pre_tokenized_text(schema.body, body);
        if let Some(published) = self.published {
            doc.add_u64(schema.published, published);
        }
        doc
    }
}

/// Which key field a delete predicate matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocField {
    ItemId,
    FeedId,
}

/// A `(field, value)` delete predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocTerm {
    pub field: DocField,
    pub value: String,
}

impl DocTerm {
    /// Predicate matching a single item by its key.
    pub fn item(value: impl Into<String>) -> Self {
        Self {
            field: DocField::ItemId,
            value: value.into(),
        }
    }

    /// Predicate matching every item of a feed.
    pub fn feed(value: impl Into<String>) -> Self {
        Self {
            field: DocField::FeedId,
            value: value.into(),
        }
    }

    pub(crate) fn field_in(&self, schema: &ItemSchema) -> Field {
        match self.field {
            DocField::ItemId => schema.item_id,
            DocField::FeedId => schema.feed_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_builds_with_expected_fields() {
        let (schema, fields) = ItemSchema::build();
        assert_eq!(schema.get_field_name(fields.item_id), "item_id");
        assert_eq!(schema.get_field_name(fields.feed_id), "feed_id");
        assert_eq!(schema.get_field_name(fields.body), "body");
    }

    #[test]
    fn term_constructors_pick_the_field() {
        let (_, fields) = ItemSchema::build();
        assert_eq!(DocTerm::item("x").field_in(&fields), fields.item_id);
        assert_eq!(DocTerm::feed("x").field_in(&fields), fields.feed_id);
    }
}
