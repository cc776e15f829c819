use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::time::now_ms;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_PROPERTY_NAME: &str = "My Home";
pub const DEFAULT_COLOR: &str = "#007AFF";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_quantity() -> i64 {
    1
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_property_icon() -> String {
    "house".to_string()
}

fn default_room_icon() -> String {
    "door.left.hand.open".to_string()
}

fn default_container_icon() -> String {
    "shippingbox".to_string()
}

fn default_category_icon() -> String {
    "square.grid.2x2".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Room,
    Container,
    Item,
    Category,
    Tag,
    Photo,
    Receipt,
}

impl EntityKind {
    /// Every kind, parents before children.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Property,
        EntityKind::Category,
        EntityKind::Tag,
        EntityKind::Room,
        EntityKind::Container,
        EntityKind::Item,
        EntityKind::Photo,
        EntityKind::Receipt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Room => "room",
            EntityKind::Container => "container",
            EntityKind::Item => "item",
            EntityKind::Category => "category",
            EntityKind::Tag => "tag",
            EntityKind::Photo => "photo",
            EntityKind::Receipt => "receipt",
        }
    }

    /// Collection name used by the structured backup format.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Property => "properties",
            EntityKind::Room => "rooms",
            EntityKind::Container => "containers",
            EntityKind::Item => "items",
            EntityKind::Category => "categories",
            EntityKind::Tag => "tags",
            EntityKind::Photo => "photos",
            EntityKind::Receipt => "receipts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value || kind.collection() == value)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (kind, id) pair naming one entity in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    New,
    LikeNew,
    #[default]
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn label(&self) -> &'static str {
        match self {
            Condition::New => "New",
            Condition::LikeNew => "Like New",
            Condition::Good => "Good",
            Condition::Fair => "Fair",
            Condition::Poor => "Poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_property_icon")]
    pub icon: String,
    #[serde(default = "default_color")]
    pub color_hex: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub notes: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            name: name.into(),
            address: None,
            icon: default_property_icon(),
            color_hex: default_color(),
            sort_order: 0,
            is_default: false,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: EntityId,
    pub name: String,
    #[serde(default = "default_room_icon")]
    pub icon: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub notes: String,
    /// Absent on rooms created before properties existed.
    #[serde(default)]
    pub property_id: Option<EntityId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            name: name.into(),
            icon: default_room_icon(),
            sort_order: 0,
            is_default: false,
            notes: String::new(),
            property_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn in_property(mut self, property_id: EntityId) -> Self {
        self.property_id = Some(property_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: EntityId,
    pub name: String,
    #[serde(default = "default_container_icon")]
    pub icon: String,
    #[serde(default = "default_color")]
    pub color_hex: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub room_id: Option<EntityId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            name: name.into(),
            icon: default_container_icon(),
            color_hex: default_color(),
            notes: String::new(),
            sort_order: 0,
            room_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn in_room(mut self, room_id: EntityId) -> Self {
        self.room_id = Some(room_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub purchase_price: Option<Decimal>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default = "default_currency")]
    pub currency_code: String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub condition_notes: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub warranty_expiry_date: Option<NaiveDate>,
    /// Free-form tags from before tags became entities.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tag_ids: BTreeSet<EntityId>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub estimated_value: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub estimated_value_low: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub estimated_value_high: Option<Decimal>,
    #[serde(default)]
    pub value_source: Option<String>,
    #[serde(default)]
    pub value_lookup_date: Option<NaiveDate>,
    #[serde(default)]
    pub category_id: Option<EntityId>,
    #[serde(default)]
    pub room_id: Option<EntityId>,
    #[serde(default)]
    pub container_id: Option<EntityId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            name: name.into(),
            brand: None,
            model_number: None,
            serial_number: None,
            barcode: None,
            quantity: default_quantity(),
            purchase_price: None,
            purchase_date: None,
            currency_code: default_currency(),
            condition: Condition::default(),
            condition_notes: String::new(),
            notes: String::new(),
            warranty_expiry_date: None,
            tags: Vec::new(),
            tag_ids: BTreeSet::new(),
            estimated_value: None,
            estimated_value_low: None,
            estimated_value_high: None,
            value_source: None,
            value_lookup_date: None,
            category_id: None,
            room_id: None,
            container_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Serial number with surrounding whitespace removed, `None` when blank.
    pub fn serial(&self) -> Option<&str> {
        self.serial_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: EntityId,
    pub name: String,
    #[serde(default = "default_category_icon")]
    pub icon: String,
    #[serde(default = "default_color")]
    pub color_hex: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub is_custom: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            name: name.into(),
            icon: default_category_icon(),
            color_hex: default_color(),
            sort_order: 0,
            is_custom: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: EntityId,
    pub name: String,
    #[serde(default = "default_color")]
    pub color_hex: String,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            name: name.into(),
            color_hex: default_color(),
            is_favorite: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPhoto {
    pub id: EntityId,
    pub item_id: EntityId,
    pub image_ref: String,
    #[serde(default)]
    pub sort_order: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ItemPhoto {
    pub fn new(item_id: EntityId, image_ref: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            item_id,
            image_ref: image_ref.into(),
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Structured text handed back by the OCR collaborator for one receipt image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub vendor: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub total: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub tax_amount: Option<Decimal>,
    pub purchase_date: Option<NaiveDate>,
    pub raw_text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: EntityId,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub total: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub tax_amount: Option<Decimal>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub raw_text: String,
    /// Stored as reported by OCR, including out-of-range values.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub item_id: Option<EntityId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Receipt {
    pub fn from_ocr(ocr: OcrResult) -> Self {
        let now = now_ms();
        Self {
            id: EntityId::new(),
            vendor: ocr.vendor,
            total: ocr.total,
            tax_amount: ocr.tax_amount,
            purchase_date: ocr.purchase_date,
            raw_text: ocr.raw_text,
            confidence: ocr.confidence,
            image_ref: None,
            item_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_item(mut self, item_id: EntityId) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

/// Any entity, tagged with its kind. This is the unit the store persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Record {
    Property(Property),
    Room(Room),
    Container(Container),
    Item(Item),
    Category(Category),
    Tag(Tag),
    Photo(ItemPhoto),
    Receipt(Receipt),
}

macro_rules! record_dispatch {
    ($self:expr, $bind:ident => $body:expr) => {
        match $self {
            Record::Property($bind) => $body,
            Record::Room($bind) => $body,
            Record::Container($bind) => $body,
            Record::Item($bind) => $body,
            Record::Category($bind) => $body,
            Record::Tag($bind) => $body,
            Record::Photo($bind) => $body,
            Record::Receipt($bind) => $body,
        }
    };
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Property(_) => EntityKind::Property,
            Record::Room(_) => EntityKind::Room,
            Record::Container(_) => EntityKind::Container,
            Record::Item(_) => EntityKind::Item,
            Record::Category(_) => EntityKind::Category,
            Record::Tag(_) => EntityKind::Tag,
            Record::Photo(_) => EntityKind::Photo,
            Record::Receipt(_) => EntityKind::Receipt,
        }
    }

    pub fn id(&self) -> EntityId {
        record_dispatch!(self, e => e.id)
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id())
    }

    pub fn created_at(&self) -> i64 {
        record_dispatch!(self, e => e.created_at)
    }

    pub fn updated_at(&self) -> i64 {
        record_dispatch!(self, e => e.updated_at)
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        record_dispatch!(self, e => e.id = id)
    }

    pub(crate) fn set_timestamps(&mut self, created_at: i64, updated_at: i64) {
        record_dispatch!(self, e => {
            e.created_at = created_at;
            e.updated_at = updated_at;
        })
    }

    /// Decode a persisted body for the given kind.
    pub fn from_json(kind: EntityKind, body: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Property => Record::Property(serde_json::from_str(body)?),
            EntityKind::Room => Record::Room(serde_json::from_str(body)?),
            EntityKind::Container => Record::Container(serde_json::from_str(body)?),
            EntityKind::Item => Record::Item(serde_json::from_str(body)?),
            EntityKind::Category => Record::Category(serde_json::from_str(body)?),
            EntityKind::Tag => Record::Tag(serde_json::from_str(body)?),
            EntityKind::Photo => Record::Photo(serde_json::from_str(body)?),
            EntityKind::Receipt => Record::Receipt(serde_json::from_str(body)?),
        })
    }

    /// Encode only the entity body; the kind travels separately.
    pub fn body_json(&self) -> serde_json::Result<String> {
        record_dispatch!(self, e => serde_json::to_string(e))
    }
}

macro_rules! impl_into_record {
    ($($ty:ident => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Record {
                fn from(value: $ty) -> Self {
                    Record::$variant(value)
                }
            }
        )+
    };
}

impl_into_record!(
    Property => Property,
    Room => Room,
    Container => Container,
    Item => Item,
    Category => Category,
    Tag => Tag,
    ItemPhoto => Photo,
    Receipt => Receipt,
);
