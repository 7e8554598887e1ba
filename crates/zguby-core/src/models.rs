//! Domain models and portal data transfer objects.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::AppError;

/// Routing key consumed by the saga.
pub const ITEM_VECTORIZED: &str = "item.vectorized";
/// Routing key of the completion event.
pub const ITEM_PUBLISHED: &str = "item.published";
/// Routing key emitted by intake; listed for bus topology only.
pub const ITEM_CREATED: &str = "item.created";
/// Routing key of dataset publication requests sent by the gateway.
pub const DATASET_PUBLISH: &str = "dataset.publish";
/// Routing key announcing a dataset accepted by the portal.
pub const DATASET_PUBLISHED: &str = "dataset.published";

/// Snapshot of a found item as carried by `item.vectorized`.
///
/// Descriptive fields default to empty so that formatting stays total over
/// partially filled payloads. Only `id` and `found_date` are structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Intake identifier, also the key of the ledger row
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// Internal category label, mapped through the category table
    #[serde(default, deserialize_with = "nullable")]
    pub category: String,
    /// Where the item was found
    #[serde(default, deserialize_with = "nullable")]
    pub location: String,
    /// Start of the publication's temporal coverage
    pub found_date: DateTime<Utc>,
    #[serde(default)]
    pub reporting_date: Option<DateTime<Utc>>,
    /// Office where the item was handed in
    #[serde(default, deserialize_with = "nullable")]
    pub reporting_location: String,
    /// Stored image; the single published resource
    #[serde(default)]
    pub image_url: Option<String>,
    /// Image size in bytes, when the intake measured it
    #[serde(default)]
    pub image_size: Option<u64>,
    #[serde(default, deserialize_with = "nullable")]
    pub contact_email: String,
    #[serde(default, deserialize_with = "nullable")]
    pub contact_phone: String,
    /// Point id in the vector index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    /// When the indexer emitted the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn nullable<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The vector indexer sometimes wraps the snapshot in a `data` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ItemEnvelope {
    Wrapped { data: Item },
    Flat(Item),
}

impl Item {
    /// Parses an `item.vectorized` message body.
    ///
    /// Accepts both the flat snapshot and the `{"data": {...}}` envelope.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ParseError` when the body is not valid JSON or
    /// lacks the structural fields.
    pub fn from_payload(payload: &[u8]) -> Result<Self, AppError> {
        let envelope: ItemEnvelope = serde_json::from_slice(payload)
            .map_err(|e| AppError::ParseError(format!("invalid item payload: {e}")))?;

        let item = match envelope {
            ItemEnvelope::Wrapped { data } => data,
            ItemEnvelope::Flat(item) => item,
        };

        if item.id.trim().is_empty() {
            return Err(AppError::ParseError("item payload has an empty id".into()));
        }

        Ok(item)
    }
}

/// Progress flags kept by the intake ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingFlags {
    /// The image embedding was computed (`processed_by_clip`)
    pub embedded: bool,
    /// The vector was stored in the index (`processed_by_qdrant`)
    pub indexed: bool,
    /// The item is on the portal (`published_on_dane_gov`)
    pub published: bool,
}

/// Proof of a confirmed external submission for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub item_id: String,
    /// Portal dataset holding the resource
    pub dataset_id: String,
    /// Portal resource id, absent for rows written before it was tracked
    pub resource_id: Option<String>,
    /// Public URL of the resource, when the portal returned one
    pub resource_url: Option<String>,
    /// When the portal confirmed the submission
    pub published_at: DateTime<Utc>,
}

/// Completion event emitted on `item.published`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPublishedEvent {
    /// Item id
    pub id: String,
    pub dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dane_gov_url: Option<String>,
    pub publication_date: DateTime<Utc>,
}

impl From<&PublicationRecord> for ItemPublishedEvent {
    fn from(record: &PublicationRecord) -> Self {
        Self {
            id: record.item_id.clone(),
            dataset_id: record.dataset_id.clone(),
            resource_id: record.resource_id.clone(),
            published_at: record.published_at,
            dane_gov_url: record.resource_url.clone(),
            publication_date: record.published_at,
        }
    }
}

/// Temporal coverage of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemporalCoverage {
    /// The found date
    pub start_date: NaiveDate,
    /// The found date plus the retention window
    pub end_date: NaiveDate,
}

/// Contact sub-fields; absent values are omitted from the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// A file attached to a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    /// Carries the item id so duplicates are recognizable on the portal
    pub name: String,
    pub description: String,
    /// File format label, e.g. `JPG`
    pub format: String,
    /// Download URL, the item's stored image
    pub url: String,
    /// Omitted when unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Portal-schema representation of an item. Recomputed on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationRequest {
    /// `lost-item-<id>`, sent as a header and as a custom field
    pub idempotency_key: String,
    pub title: String,
    /// Free-text description of the item
    pub notes: String,
    /// Portal category from the category table
    pub category: String,
    /// EU data-theme URI from the category table
    pub theme: String,
    /// Keywords in formatter order, duplicates kept
    pub tags: Vec<String>,
    pub license: String,
    /// Portal custom fields, ordered by name
    pub custom_fields: BTreeMap<String, String>,
    pub temporal: TemporalCoverage,
    /// Found location, omitted when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<String>,
    pub contact_point: ContactPoint,
    /// Always exactly one entry, the item image
    pub resources: Vec<ResourceDescriptor>,
}

impl PublicationRequest {
    /// Builds the body for `POST /api/datasets/{id}/resources`.
    ///
    /// The resource endpoint has no dataset-level metadata, so keywords go
    /// out both as `tags` and inside the custom fields.
    ///
    /// Returns `None` when the publication carries no resource, which the
    /// formatter never produces.
    pub fn resource_request(&self) -> Option<ResourceRequest> {
        let resource = self.resources.first()?;
        Some(ResourceRequest {
            data: JsonApiData {
                kind: "resource".to_string(),
                attributes: ResourceAttributes {
                    name: resource.name.clone(),
                    description: resource.description.clone(),
                    format: resource.format.clone(),
                    url: resource.url.clone(),
                    size: resource.size,
                    tags: self.tags.clone(),
                    custom_fields: self.custom_fields.clone(),
                },
            },
        })
    }
}

/// JSON:API `data` wrapper used by the portal for request bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonApiData<A> {
    /// JSON:API resource type, e.g. `resource` or `dataset`
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: A,
}

/// Attributes of a resource submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAttributes {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// File format label
    pub format: String,
    /// Download URL of the file
    pub url: String,
    /// Size in bytes, omitted when unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Keywords of the item
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form key/value pairs stored with the resource
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, String>,
}

/// Body of `POST /api/datasets/{id}/resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub data: JsonApiData<ResourceAttributes>,
}

/// Attributes of the dataset created on startup when auto-create is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetAttributes {
    pub title: String,
    /// Dataset description shown on the portal
    pub notes: String,
    /// Portal category
    pub category: String,
    /// Publication status, `published` for auto-created datasets
    pub status: String,
    /// `public` or `private`
    pub visibility: String,
    /// How often resources are added, `onDemand` here
    pub update_frequency: String,
    pub tags: Vec<String>,
    /// License identifier
    #[serde(rename = "license_id")]
    pub license: String,
    /// Organization owning the dataset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// Body of `POST /api/datasets` on the auto-create path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRequest {
    pub data: JsonApiData<DatasetAttributes>,
}

/// A resource confirmed by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedResource {
    /// Portal resource id
    pub id: String,
    /// Public URL, from the attributes or the `self` link
    pub url: Option<String>,
}

/// A dataset publication request sent by the gateway on `dataset.publish`.
///
/// The gateway describes datasets kept in its own catalogue; the publisher
/// forwards them to the portal as dataset submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPublishEvent {
    /// Gateway-side dataset id
    pub dataset_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: String,
    /// Landing page of the dataset
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    /// Institution publishing the dataset
    #[serde(default, deserialize_with = "nullable")]
    pub institution_name: String,
    /// Contact address of the institution
    #[serde(default, deserialize_with = "nullable")]
    pub email: String,
    #[serde(default, deserialize_with = "nullable_list")]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub tags: Vec<String>,
    /// When the gateway queued the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl DatasetPublishEvent {
    /// Parses a `dataset.publish` message body.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ParseError` when the body is not valid JSON or has
    /// an empty `dataset_id`.
    pub fn from_payload(payload: &[u8]) -> Result<Self, AppError> {
        let event: DatasetPublishEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::ParseError(format!("invalid dataset payload: {e}")))?;

        if event.dataset_id.trim().is_empty() {
            return Err(AppError::ParseError(
                "dataset payload has an empty dataset_id".into(),
            ));
        }

        Ok(event)
    }

    /// Stable key the portal can use to collapse a resubmitted dataset.
    pub fn idempotency_key(&self) -> String {
        format!("gateway-dataset-{}", self.dataset_id)
    }

    /// Builds the `dataset-submission` body.
    ///
    /// # Errors
    ///
    /// Returns `AppError::FormatError` when the title is blank; the portal
    /// rejects untitled submissions, so retrying cannot help.
    pub fn to_submission(&self) -> Result<DatasetSubmissionRequest, AppError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::FormatError(format!(
                "dataset {} has no title",
                self.dataset_id
            )));
        }

        Ok(DatasetSubmissionRequest {
            data: JsonApiData {
                kind: "dataset-submission".to_string(),
                attributes: DatasetSubmissionAttributes {
                    title: title.to_string(),
                    notes: self.notes.clone(),
                    url: self.url.clone(),
                    institution_name: self.institution_name.clone(),
                    email: self.email.clone(),
                    categories: self.categories.clone(),
                    tags: self.tags.clone(),
                },
            },
        })
    }
}

/// Attributes of a `dataset-submission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSubmissionAttributes {
    pub title: String,
    pub notes: String,
    /// Landing page of the dataset
    pub url: String,
    pub institution_name: String,
    /// Contact address of the institution
    pub email: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

/// Body of `POST /api/datasets` for a gateway dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSubmissionRequest {
    pub data: JsonApiData<DatasetSubmissionAttributes>,
}

/// A dataset accepted by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedDataset {
    /// Portal dataset id
    pub id: String,
    /// The `self` link, or the public URL when no link was returned
    pub url: Option<String>,
}

/// Completion event emitted on `dataset.published`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPublishedEvent {
    /// Gateway-side dataset id, copied from the request
    pub dataset_id: String,
    /// Id assigned by the portal
    pub dane_gov_id: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dane_gov_url: Option<String>,
    pub publication_date: DateTime<Utc>,
}

impl DatasetPublishedEvent {
    pub fn new(dataset_id: &str, submitted: SubmittedDataset, at: DateTime<Utc>) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            dane_gov_id: submitted.id,
            published_at: at,
            dane_gov_url: submitted.url,
            publication_date: at,
        }
    }
}
