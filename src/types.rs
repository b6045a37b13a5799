use serde::{Deserialize, Serialize};

pub const OUTPUT_HEADER: [&str; 3] = ["IMAGE_URL", "TAGS", "Confidence Scores"];

pub const INVALID_URL_TAGS: &str = "Invalid URL";
pub const CLASSIFICATION_FAILED_TAGS: &str = "Classification Failed";
pub const PROCESSING_ERROR_TAGS: &str = "Processing Error";
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub struct Concept {
    pub label: String,
    pub confidence: f64,
}

impl Concept {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Outcome of classifying one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The service answered; the list may be empty.
    Concepts(Vec<Concept>),
    /// Every attempt was throttled.
    RateLimited { attempts: u32 },
    RemoteError(String),
    /// Empty image reference, nothing was sent.
    InvalidInput,
}

impl Classification {
    /// Concepts of a successful call, empty for every failure.
    pub fn concepts(&self) -> &[Concept] {
        match self {
            Classification::Concepts(concepts) => concepts,
            _ => &[],
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Classification::RateLimited { .. } | Classification::RemoteError(_)
        )
    }
}

/// One row of the output table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub image_url: String,
    pub tags: String,
    pub scores: String,
}

impl OutputRecord {
    pub fn from_classification(image_url: &str, classification: &Classification) -> Self {
        if classification.is_failure() {
            return Self::sentinel(image_url, CLASSIFICATION_FAILED_TAGS);
        }

        let concepts = classification.concepts();
        let tags = concepts
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let scores = concepts
            .iter()
            .map(|c| format_score(c.confidence))
            .collect::<Vec<_>>()
            .join(";");

        Self {
            image_url: image_url.to_string(),
            tags,
            scores,
        }
    }

    pub fn invalid_url(image_url: &str) -> Self {
        Self::sentinel(image_url, INVALID_URL_TAGS)
    }

    pub fn processing_error(image_url: &str) -> Self {
        Self::sentinel(image_url, PROCESSING_ERROR_TAGS)
    }

    fn sentinel(image_url: &str, tags: &str) -> Self {
        Self {
            image_url: image_url.to_string(),
            tags: tags.to_string(),
            scores: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn is_invalid_url(&self) -> bool {
        self.is_sentinel(INVALID_URL_TAGS)
    }

    pub fn is_classification_failure(&self) -> bool {
        self.is_sentinel(CLASSIFICATION_FAILED_TAGS)
    }

    // Real scores are never "N/A".
    fn is_sentinel(&self, tags: &str) -> bool {
        self.tags == tags && self.scores == NOT_AVAILABLE
    }

    pub fn as_row(&self) -> [&str; 3] {
        [self.image_url.as_str(), self.tags.as_str(), self.scores.as_str()]
    }
}

/// Renders a confidence the way the service's Python clients print floats:
/// integral values keep a trailing `.0` and magnitudes below `1e-4` or from
/// `1e16` up switch to a two-digit exponent (`1e-05`).
pub fn format_score(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let scientific = format!("{value:e}");
        if let Some((mantissa, exponent)) = scientific.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                return format!("{mantissa}e{sign}{:02}", exponent.abs());
            }
        }
        return scientific;
    }

    let plain = value.to_string();
    if plain.contains('.') {
        plain
    } else {
        format!("{plain}.0")
    }
}

// Clarifai v2 wire format, reduced to the fields we read and send.

#[derive(Debug, Serialize)]
pub struct PostModelOutputsRequest {
    pub inputs: Vec<Input>,
}

impl PostModelOutputsRequest {
    pub fn for_image_url(url: &str) -> Self {
        Self {
            inputs: vec![Input {
                data: InputData {
                    image: Image {
                        url: url.to_string(),
                    },
                },
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Input {
    pub data: InputData,
}

#[derive(Debug, Serialize)]
pub struct InputData {
    pub image: Image,
}

#[derive(Debug, Serialize)]
pub struct Image {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PostModelOutputsResponse {
    pub status: Status,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Deserialize)]
pub struct Status {
    pub code: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub data: OutputData,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputData {
    #[serde(default)]
    pub concepts: Vec<WireConcept>,
}

#[derive(Debug, Deserialize)]
pub struct WireConcept {
    pub name: String,
    pub value: f64,
}

impl From<WireConcept> for Concept {
    fn from(concept: WireConcept) -> Self {
        Concept::new(concept.name, concept.value)
    }
}
