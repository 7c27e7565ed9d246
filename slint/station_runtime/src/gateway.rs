use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::protocol::InboundMessage;

const ABSENT_TRANSACTION_MARKERS: [&str; 2] = ["/None", "/error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("message from untrusted origin {origin:?}")]
    UntrustedOrigin { origin: String },

    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    #[serde(rename = "SET_VOTING_URL")]
    SetVotingUrl {
        #[serde(rename = "voteUrl", default)]
        vote_url: Option<String>,
    },

    #[serde(rename = "VOTE_DATA")]
    VoteData {
        #[serde(rename = "hashValue", default)]
        hash_value: Option<String>,
        #[serde(rename = "pdfUrl", default)]
        pdf_url: Option<String>,
        #[serde(rename = "subscanUrl", default)]
        subscan_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSubmission {
    pub document_reference: String,
    pub proof_hash: String,
    pub transaction_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayAction {
    SetVotingUrl(String),
    RecordVote(VoteSubmission),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub accepted: u64,
    pub untrusted: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone)]
pub struct MessageChannelGateway {
    trusted_origin: String,
    stats: GatewayStats,
}

impl MessageChannelGateway {
    pub fn new(trusted_origin: impl Into<String>) -> Self {
        Self {
            trusted_origin: trusted_origin.into(),
            stats: GatewayStats::default(),
        }
    }

    pub fn trusted_origin(&self) -> &str {
        &self.trusted_origin
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    pub fn accept(&self, message: &InboundMessage) -> Result<GatewayAction, GatewayError> {
        if message.origin != self.trusted_origin {
            return Err(GatewayError::UntrustedOrigin {
                origin: message.origin.clone(),
            });
        }

        match parse_message(&message.data)? {
            ChannelMessage::SetVotingUrl { vote_url } => {
                let url = require("SET_VOTING_URL", "voteUrl", vote_url)?;
                Ok(GatewayAction::SetVotingUrl(url))
            }
            ChannelMessage::VoteData {
                hash_value,
                pdf_url,
                subscan_url,
            } => {
                let proof_hash = require("VOTE_DATA", "hashValue", hash_value)?;
                let transaction_reference = require("VOTE_DATA", "subscanUrl", subscan_url)?;
                let document = require("VOTE_DATA", "pdfUrl", pdf_url)?;

                if let Some(marker) = absence_marker(&transaction_reference) {
                    return Err(GatewayError::Malformed {
                        kind: "VOTE_DATA",
                        reason: format!("transaction reference ends with {marker}"),
                    });
                }

                Ok(GatewayAction::RecordVote(VoteSubmission {
                    document_reference: resolve_document_reference(
                        &self.trusted_origin,
                        &document,
                    ),
                    proof_hash,
                    transaction_reference,
                }))
            }
        }
    }

    pub fn route(&mut self, message: &InboundMessage) -> Option<GatewayAction> {
        match self.accept(message) {
            Ok(action) => {
                self.stats.accepted += 1;
                Some(action)
            }
            Err(err @ GatewayError::UntrustedOrigin { .. }) => {
                self.stats.untrusted += 1;
                warn!(error = %err, dropped = self.stats.untrusted, "dropping cross-context message");
                None
            }
            Err(err) => {
                self.stats.malformed += 1;
                warn!(
                    error = %err,
                    dropped = self.stats.malformed,
                    payload = %message.data,
                    "dropping cross-context message"
                );
                None
            }
        }
    }
}

fn parse_message(data: &serde_json::Value) -> Result<ChannelMessage, GatewayError> {
    let Some(kind) = data.get("type").and_then(serde_json::Value::as_str) else {
        return Err(GatewayError::Malformed {
            kind: "message",
            reason: "missing string `type` discriminator".to_string(),
        });
    };

    if !matches!(kind, "SET_VOTING_URL" | "VOTE_DATA") {
        return Err(GatewayError::UnknownType(kind.to_string()));
    }

    ChannelMessage::deserialize(data).map_err(|err| GatewayError::Malformed {
        kind: "message",
        reason: err.to_string(),
    })
}

fn require(
    kind: &'static str,
    field: &'static str,
    value: Option<String>,
) -> Result<String, GatewayError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(GatewayError::Malformed {
            kind,
            reason: format!("`{field}` is missing or empty"),
        }),
    }
}

fn absence_marker(reference: &str) -> Option<&'static str> {
    ABSENT_TRANSACTION_MARKERS
        .into_iter()
        .find(|marker| reference.ends_with(marker))
}

pub fn resolve_document_reference(trusted_origin: &str, document: &str) -> String {
    if document.starts_with("http://") || document.starts_with("https://") {
        return document.to_string();
    }

    let origin = trusted_origin.trim_end_matches('/');
    if document.starts_with('/') {
        format!("{origin}{document}")
    } else {
        format!("{origin}/{document}")
    }
}
