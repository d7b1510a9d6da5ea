use thiserror::Error;

/// Setup errors, returned when creating a [`LivePreview`](crate::LivePreview) instance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("A default locale is required, e.g. \"en-US\"")]
	MissingLocale,

	#[error("Invalid target origin {origin:?}: expected a URL origin like \"https://app.contentful.com\"")]
	InvalidTargetOrigin { origin: String },

	#[error("Invalid configuration object: {message}")]
	Invalid { message: String },

	#[error("No browser window available")]
	NoWindow,

	#[error("The page is neither embedded in nor opened by the editor")]
	NotEmbedded,
}

/// Why a subscription was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
	#[error("No `sys.id` found in the subscribed data")]
	MissingSysId,

	#[error("Found `sys.id` {sys_ids:?} but neither `fields` (REST) nor `__typename` (GraphQL); cannot tell the data shape")]
	Indeterminate { sys_ids: Vec<String> },

	#[error("Subscribed data must be a JSON object or array")]
	NotAContainer,
}

#[derive(Error, Debug)]
pub enum ChannelError {
	#[error("Failed to serialize outbound message: {0}")]
	Serialize(#[source] serde_json::Error),

	#[error("Failed to deserialize inbound message: {0}")]
	Deserialize(#[source] serde_json::Error),

	#[error("Failed to post message: {0}")]
	Post(String),
}

/// A merge pass that could not complete for one subscription.
///
/// These never escape the subscription registry; they are logged and the subscription keeps its previous data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
	#[error("Updated entity has no `sys.id`")]
	MissingUpdateId,

	#[error("Field {field:?} of {entity_id:?} has a non-object `fields` container")]
	MalformedFields { entity_id: String, field: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
	#[error("Unexpected token at {pos}: expected {expected}, found {found:?}")]
	UnexpectedToken { pos: usize, expected: &'static str, found: String },

	#[error("Unexpected end of query")]
	UnexpectedEof,

	#[error("Unrecognized input at {pos}")]
	Lexer { pos: usize },
}

/// Why a steganographic source map hint couldn't be turned into a field reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvenanceError {
	#[error("Hint is from origin {origin:?}, not contentful.com")]
	ForeignOrigin { origin: String },

	#[error("Href {href:?} is missing the space and environment")]
	MissingSpaceEnvironment { href: String },

	#[error("Href {href:?} is missing the entry or asset id")]
	MissingEntity { href: String },

	#[error("Href {href:?} is missing the focused field")]
	MissingField { href: String },

	#[error("Href {href:?} is missing the focused locale")]
	MissingLocale { href: String },
}
