//! Wire codec: decode/encode, validation, problem reports
//!
//! The wire form of a message is a flat JSON object `{id, type, from, to,
//! thid?, pthid?, body?}`. Decoding enforces the envelope contract and the
//! required body fields of each type; failures carry enough offender context
//! to build a problem report threaded back to the sender
//! (`pthid = offender.thid ?? offender.id`).

use crate::messages::{
    Body, ChallengeResponseBody, DenyBody, Envelope, GuardianShareUpdateBody,
    NamespaceGrantBody, NamespaceRecoveryRequestBody, NamespaceSyncBody,
    NamespaceSyncResponseBody, ProblemReportBody, ReleaseShareBody, SyncOp,
    VerificationChallengeBody, TYPE_PREFIX,
};
use coralkm_core::{CoralError, Did};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

/// Enough of a malformed message to address a problem report.
#[derive(Debug, Clone, PartialEq)]
pub struct Offender {
    /// The offending message's id
    pub id: Uuid,
    /// Who sent it
    pub from: Did,
    /// Its thread id, if it had one
    pub thid: Option<Uuid>,
}

impl Offender {
    /// Offender context of a fully decoded message.
    pub fn of(envelope: &Envelope) -> Self {
        Offender {
            id: envelope.id,
            from: envelope.from.clone(),
            thid: envelope.thid,
        }
    }
}

/// Decode failure. `offender` is `None` when the message was too broken to
/// answer (no parseable id or sender).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    /// What went wrong
    pub error: CoralError,
    /// Where to send the problem report
    pub offender: Option<Offender>,
}

impl DecodeError {
    fn unanswerable(error: CoralError) -> Self {
        DecodeError {
            error,
            offender: None,
        }
    }

    fn addressed(error: CoralError, offender: Offender) -> Self {
        DecodeError {
            error,
            offender: Some(offender),
        }
    }
}

/// Serialize a message to its wire form.
pub fn encode(envelope: &Envelope) -> Value {
    let mut wire = json!({
        "id": envelope.id,
        "type": envelope.type_uri(),
        "from": envelope.from,
        "to": envelope.to,
    });
    if let Some(thid) = envelope.thid {
        wire["thid"] = json!(thid);
    }
    if let Some(pthid) = envelope.pthid {
        wire["pthid"] = json!(pthid);
    }
    if let Some(body) = encode_body(&envelope.body) {
        wire["body"] = body;
    }
    wire
}

fn encode_body(body: &Body) -> Option<Value> {
    // Unit bodies carry no body object on the wire
    let value = match body {
        Body::NamespaceRequest
        | Body::GuardianRequest
        | Body::GuardianGrant
        | Body::GuardianRemove
        | Body::GuardianRemoveConfirm
        | Body::GuardianShareUpdateConfirm => return None,
        Body::NamespaceGrant(b) => serde_json::to_value(b),
        Body::NamespaceDeny(b) | Body::GuardianDeny(b) => serde_json::to_value(b),
        Body::NamespaceSync(b) => serde_json::to_value(b),
        Body::NamespaceSyncResponse(b) => serde_json::to_value(b),
        Body::NamespaceRecoveryRequest(b) => serde_json::to_value(b),
        Body::GuardianShareUpdate(b) => serde_json::to_value(b),
        Body::GuardianVerificationChallenge(b) => serde_json::to_value(b),
        Body::GuardianVerificationChallengeResponse(b) => serde_json::to_value(b),
        Body::GuardianReleaseShare(b) => serde_json::to_value(b),
        Body::ProblemReport(b) => serde_json::to_value(b),
    };
    // Serialization of these plain structs cannot fail
    value.ok()
}

/// Parse and validate a wire message.
pub fn decode(wire: &Value) -> Result<Envelope, DecodeError> {
    let id = match wire.get("id").and_then(Value::as_str).map(Uuid::parse_str) {
        Some(Ok(id)) => id,
        _ => {
            return Err(DecodeError::unanswerable(CoralError::invalid_argument(
                "id",
            )))
        }
    };
    let from = match wire.get("from").and_then(Value::as_str) {
        Some(from) if !from.is_empty() => Did::new(from),
        _ => {
            return Err(DecodeError::unanswerable(CoralError::invalid_argument(
                "from",
            )))
        }
    };
    let thid = match optional_uuid(wire, "thid") {
        Ok(thid) => thid,
        Err(error) => {
            return Err(DecodeError::addressed(
                error,
                Offender {
                    id,
                    from,
                    thid: None,
                },
            ))
        }
    };

    let offender = Offender {
        id,
        from: from.clone(),
        thid,
    };
    let fail = |error: CoralError| DecodeError::addressed(error, offender.clone());

    let pthid = optional_uuid(wire, "pthid").map_err(fail.clone())?;

    let to: Vec<Did> = match wire.get("to") {
        Some(Value::Array(entries)) if !entries.is_empty() => entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(Did::new)
                    .ok_or_else(|| fail(CoralError::invalid_argument("to")))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(fail(CoralError::invalid_argument("to"))),
    };

    let type_uri = wire
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| fail(CoralError::invalid_argument("type")))?;
    let suffix = type_uri
        .strip_prefix(TYPE_PREFIX)
        .ok_or_else(|| fail(CoralError::unsupported_type(type_uri)))?;

    let body_value = wire.get("body");
    let body = decode_body(suffix, body_value, pthid).map_err(&fail)?;

    Ok(Envelope {
        id,
        from,
        to,
        thid,
        pthid,
        body,
    })
}

fn decode_body(
    suffix: &str,
    body: Option<&Value>,
    pthid: Option<Uuid>,
) -> Result<Body, CoralError> {
    match suffix {
        "namespace-request" => Ok(Body::NamespaceRequest),
        "guardian-request" => Ok(Body::GuardianRequest),
        "guardian-grant" => Ok(Body::GuardianGrant),
        "guardian-remove" => Ok(Body::GuardianRemove),
        "guardian-remove-confirm" => Ok(Body::GuardianRemoveConfirm),
        "guardian-share-update-confirm" => Ok(Body::GuardianShareUpdateConfirm),
        "namespace-grant" => Ok(Body::NamespaceGrant(required::<NamespaceGrantBody>(
            suffix, body,
        )?)),
        "namespace-deny" => Ok(Body::NamespaceDeny(optional_body::<DenyBody>(body)?)),
        "guardian-deny" => Ok(Body::GuardianDeny(optional_body::<DenyBody>(body)?)),
        "namespace-sync" => {
            let sync: NamespaceSyncBody = required(suffix, body)?;
            if sync.request == SyncOp::Put && sync.data.is_none() {
                return Err(CoralError::invalid_argument("body.data"));
            }
            Ok(Body::NamespaceSync(sync))
        }
        "namespace-sync-response" => {
            let response: NamespaceSyncResponseBody = required(suffix, body)?;
            let present = match response.request {
                SyncOp::Put => response.hash.is_some(),
                SyncOp::Get => response.data.is_some(),
            };
            if !present {
                return Err(CoralError::invalid_argument("body.hash/body.data"));
            }
            Ok(Body::NamespaceSyncResponse(response))
        }
        "namespace-recovery-request" => Ok(Body::NamespaceRecoveryRequest(required::<
            NamespaceRecoveryRequestBody,
        >(suffix, body)?)),
        "guardian-share-update" => Ok(Body::GuardianShareUpdate(
            required::<GuardianShareUpdateBody>(suffix, body)?,
        )),
        "guardian-verification-challenge" => {
            if pthid.is_none() {
                return Err(CoralError::invalid_argument("pthid"));
            }
            Ok(Body::GuardianVerificationChallenge(required::<
                VerificationChallengeBody,
            >(suffix, body)?))
        }
        "guardian-verification-challenge-response" => {
            if pthid.is_none() {
                return Err(CoralError::invalid_argument("pthid"));
            }
            Ok(Body::GuardianVerificationChallengeResponse(required::<
                ChallengeResponseBody,
            >(suffix, body)?))
        }
        "guardian-release-share" => {
            if pthid.is_none() {
                return Err(CoralError::invalid_argument("pthid"));
            }
            Ok(Body::GuardianReleaseShare(required::<ReleaseShareBody>(
                suffix, body,
            )?))
        }
        "report-problem" => Ok(Body::ProblemReport(required::<ProblemReportBody>(
            suffix, body,
        )?)),
        other => Err(CoralError::unsupported_type(format!("{TYPE_PREFIX}{other}"))),
    }
}

fn required<T: DeserializeOwned>(suffix: &str, body: Option<&Value>) -> Result<T, CoralError> {
    let value = body
        .ok_or_else(|| CoralError::invalid_argument(format!("body ({suffix})")))?
        .clone();
    serde_json::from_value(value)
        .map_err(|e| CoralError::invalid_argument(format!("body ({suffix}): {e}")))
}

fn optional_body<T: DeserializeOwned + Default>(body: Option<&Value>) -> Result<T, CoralError> {
    match body {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| CoralError::invalid_argument(format!("body: {e}"))),
    }
}

fn optional_uuid(wire: &Value, field: &str) -> Result<Option<Uuid>, CoralError> {
    match wire.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| CoralError::invalid_argument(field)),
        Some(_) => Err(CoralError::invalid_argument(field)),
    }
}

/// Build the problem-report body for an error, with placeholder args where
/// the comment benefits from them.
pub fn problem_body(error: &CoralError) -> ProblemReportBody {
    let (comment, args) = match error {
        CoralError::InvalidArgument { message } => (
            "invalid or missing field: {1}".to_string(),
            Some(vec![message.clone()]),
        ),
        CoralError::UnsupportedMessageType { type_uri } => (
            "unsupported message type {1}".to_string(),
            Some(vec![type_uri.clone()]),
        ),
        CoralError::InvalidRole { role } => (
            "receiver does not play the {1} role".to_string(),
            Some(vec![role.clone()]),
        ),
        other => (other.to_string(), None),
    };
    ProblemReportBody {
        code: error.code().to_string(),
        comment,
        args,
        escalate_to: None,
    }
}

/// Build a problem-report message for an offending message.
///
/// The report is addressed to the offender's sender and carries
/// `pthid = offender.thid ?? offender.id` so the failure stays on the
/// original thread.
pub fn problem_report(id: Uuid, from: Did, offender: &Offender, error: &CoralError) -> Envelope {
    Envelope::new(
        id,
        from,
        offender.from.clone(),
        Body::ProblemReport(problem_body(error)),
    )
    .with_pthid(offender.thid.unwrap_or(offender.id))
}

/// Substitute `{1}`..`{n}` placeholders in a problem-report comment.
///
/// Indices without a matching argument stay literal.
pub fn render_comment(comment: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(comment.len());
    let mut chars = comment.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut end = None;
        for (i, c2) in comment[start + 1..].char_indices() {
            match c2 {
                '0'..='9' => continue,
                '}' if i > 0 => {
                    end = Some(start + 1 + i);
                    break;
                }
                _ => break,
            }
        }
        match end {
            Some(end) => {
                let index: usize = comment[start + 1..end].parse().unwrap_or(0);
                match index.checked_sub(1).and_then(|i| args.get(i)) {
                    Some(arg) => out.push_str(arg),
                    None => out.push_str(&comment[start..=end]),
                }
                // Skip the consumed placeholder
                while chars.peek().is_some_and(|&(i, _)| i <= end) {
                    chars.next();
                }
            }
            None => out.push(c),
        }
    }
    out
}
