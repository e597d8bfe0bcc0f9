//! Cookie classification records.

use chrono::{DateTime, Utc};

/// Functional category of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieCategory {
    Essential,
    Analytics,
    Advertising,
    Functional,
    Performance,
    SocialMedia,
    Security,
    Personalization,
    Unknown,
}

impl CookieCategory {
    pub const ALL: [CookieCategory; 9] = [
        CookieCategory::Essential,
        CookieCategory::Analytics,
        CookieCategory::Advertising,
        CookieCategory::Functional,
        CookieCategory::Performance,
        CookieCategory::SocialMedia,
        CookieCategory::Security,
        CookieCategory::Personalization,
        CookieCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CookieCategory::Essential => "Essential",
            CookieCategory::Analytics => "Analytics",
            CookieCategory::Advertising => "Advertising",
            CookieCategory::Functional => "Functional",
            CookieCategory::Performance => "Performance",
            CookieCategory::SocialMedia => "SocialMedia",
            CookieCategory::Security => "Security",
            CookieCategory::Personalization => "Personalization",
            CookieCategory::Unknown => "Unknown",
        }
    }

    /// Lenient parse accepting canonical names, "Social Media", and any
    /// casing. Unrecognized input maps to `Unknown`, never an error: the LM
    /// is free-form and the store must not reject its spelling.
    pub fn parse_lenient(value: &str) -> Self {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "essential" | "essentialfunctional" => CookieCategory::Essential,
            "analytics" | "analyticstracking" => CookieCategory::Analytics,
            "advertising" | "advertisingmarketing" => CookieCategory::Advertising,
            "functional" => CookieCategory::Functional,
            "performance" => CookieCategory::Performance,
            "socialmedia" => CookieCategory::SocialMedia,
            "security" => CookieCategory::Security,
            "personalization" => CookieCategory::Personalization,
            _ => CookieCategory::Unknown,
        }
    }
}

/// Privacy impact level of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivacyImpact {
    Low,
    Medium,
    High,
    Critical,
}

impl PrivacyImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyImpact::Low => "Low",
            PrivacyImpact::Medium => "Medium",
            PrivacyImpact::High => "High",
            PrivacyImpact::Critical => "Critical",
        }
    }

    /// Lenient parse; unrecognized input defaults to `Medium`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => PrivacyImpact::Low,
            "high" => PrivacyImpact::High,
            "critical" => PrivacyImpact::Critical,
            _ => PrivacyImpact::Medium,
        }
    }
}

/// Where a descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorSource {
    Ai,
    Manual,
    Imported,
    Pattern,
}

impl DescriptorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorSource::Ai => "ai",
            DescriptorSource::Manual => "manual",
            DescriptorSource::Imported => "imported",
            DescriptorSource::Pattern => "pattern",
        }
    }

    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => DescriptorSource::Manual,
            "imported" => DescriptorSource::Imported,
            "pattern" => DescriptorSource::Pattern,
            _ => DescriptorSource::Ai,
        }
    }
}

/// Everything the pipeline knows about one cookie name.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieDescriptor {
    pub id: Option<i64>,
    pub name: String,
    pub vendor: Option<String>,
    pub category: CookieCategory,
    pub purpose: Option<String>,
    pub privacy_impact: PrivacyImpact,
    pub third_party: bool,
    pub typical_expiration: Option<String>,
    pub common_domains: Vec<String>,
    pub notes: Option<String>,
    pub confidence: f64,
    pub source: DescriptorSource,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CookieDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            vendor: None,
            category: CookieCategory::Unknown,
            purpose: None,
            privacy_impact: PrivacyImpact::Medium,
            third_party: false,
            typical_expiration: None,
            common_domains: Vec::new(),
            notes: None,
            confidence: 0.0,
            source: DescriptorSource::Ai,
            created_at: None,
            updated_at: None,
        }
    }

    /// Placeholder descriptor for a cookie nothing could classify.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            vendor: Some("Unknown".to_string()),
            purpose: Some("Information not available".to_string()),
            ..Self::new(name)
        }
    }
}
