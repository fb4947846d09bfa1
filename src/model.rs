use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Jobs,
    RealEstate,
    Vehicles,
    Services,
    Goods,
    Events,
    Businesses,
    Community,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jobs => "jobs",
            Self::RealEstate => "real-estate",
            Self::Vehicles => "vehicles",
            Self::Services => "services",
            Self::Goods => "goods",
            Self::Events => "events",
            Self::Businesses => "businesses",
            Self::Community => "community",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse content-volume tier. Ordering follows the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeTier {
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
}

impl SizeTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Huge => "huge",
        }
    }

    /// Days an ad of this tier stays listed after publication.
    pub fn expiry_days(self) -> u64 {
        match self {
            Self::Tiny => 7,
            Self::Small => 14,
            Self::Medium => 21,
            Self::Large => 30,
            Self::Huge => 45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Phone,
    Whatsapp,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub kind: ContactKind,
    pub value: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredLocation {
    pub country: String,
    pub region: String,
    pub province: String,
    pub district: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Text { text: String },
    Structured(StructuredLocation),
}

impl Location {
    /// Single-line rendering used for indexing and logs.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Structured(loc) => {
                let mut parts = Vec::with_capacity(4);
                if let Some(address) = &loc.address {
                    parts.push(address.as_str());
                }
                parts.push(loc.district.as_str());
                if loc.province != loc.district {
                    parts.push(loc.province.as_str());
                }
                parts.push(loc.region.as_str());
                parts.join(", ")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedAd {
    pub id: Uuid,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub contacts: Vec<Contact>,
    pub location: Location,
    pub size_tier: SizeTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_text: Option<String>,
    pub published_at: NaiveDate,
    pub expires_at: NaiveDate,
    pub source_edition: String,
    pub source_page: u32,
    pub is_historic: bool,
    pub is_active: bool,
}

impl ClassifiedAd {
    pub fn primary_contact(&self) -> Option<&Contact> {
        self.contacts.iter().find(|contact| contact.is_primary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportUnitProgress {
    pub unit_id: String,
    pub status: UnitStatus,
    pub pages_processed: usize,
    pub rows_seen: usize,
    pub noise_dropped: usize,
    pub ads_extracted: usize,
    pub rejected: usize,
    pub ads_loaded: usize,
    pub quarantined: usize,
    pub errors: Vec<String>,
    pub source_sha256: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ImportUnitProgress {
    pub fn pending(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub units_total: usize,
    pub units_completed: usize,
    pub units_failed: usize,
    pub units_in_progress: usize,
    pub rows_seen: usize,
    pub ads_extracted: usize,
    pub rejected: usize,
    pub ads_loaded: usize,
    pub quarantined: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub updated_at: String,
    pub totals: RunTotals,
    pub units: BTreeMap<String, ImportUnitProgress>,
}

impl ImportRun {
    pub fn recompute_totals(&mut self) {
        let mut totals = RunTotals {
            units_total: self.units.len(),
            ..RunTotals::default()
        };
        for unit in self.units.values() {
            match unit.status {
                UnitStatus::Completed => totals.units_completed += 1,
                UnitStatus::Failed => totals.units_failed += 1,
                UnitStatus::InProgress => totals.units_in_progress += 1,
                UnitStatus::Pending => {}
            }
            totals.rows_seen += unit.rows_seen;
            totals.ads_extracted += unit.ads_extracted;
            totals.rejected += unit.rejected;
            totals.ads_loaded += unit.ads_loaded;
            totals.quarantined += unit.quarantined;
        }
        self.totals = totals;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub record: ClassifiedAd,
    pub last_error: String,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineFile {
    pub manifest_version: u32,
    pub unit_id: String,
    pub updated_at: String,
    pub entries: Vec<QuarantineEntry>,
}

/// Optional per-edition metadata document (`info.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditionInfo {
    pub edition_id: String,
    pub published_at: NaiveDate,
    #[serde(default)]
    pub page_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFileEntry {
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditionEntry {
    pub edition_id: String,
    pub directory: String,
    pub published_at: NaiveDate,
    pub date_source: String,
    pub page_count: usize,
    pub sha256: String,
    pub files: Vec<PageFileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditionInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub edition_count: usize,
    pub editions: Vec<EditionEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
