//! Push payload decoding and notification routing.
//!
//! Inbound push messages are producer-controlled and arrive in whatever
//! shape the producer felt like sending. Any parse failure degrades to
//! [`PushPayload::default()`] (generic title and body) instead of
//! failing the event. Notification taps are routed back
//! into a running application context when one exists, as an in-process
//! navigation message, so application state survives the jump.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Title used when the payload carries none.
pub const DEFAULT_TITLE: &str = "Notifikasi Story";
/// Body used when the payload carries none.
pub const DEFAULT_BODY: &str = "Ada pembaruan cerita baru.";
/// Tag collapsing repeated story notifications into one.
pub const NOTIFICATION_TAG: &str = "story-notification";

/// Message type for cross-context navigation.
pub const NAVIGATE_MESSAGE_TYPE: &str = "NAVIGATE";

/// Raw inbound push message. Every field is optional; the producer owns
/// this shape, not us.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  #[serde(default)]
  pub data: Option<PushData>,
  #[serde(default)]
  pub options: Option<PushOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushData {
  #[serde(rename = "storyId")]
  pub story_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushOptions {
  pub body: Option<String>,
}

#[derive(Debug, Error)]
pub enum PushParseError {
  #[error("malformed push payload: {0}")]
  Malformed(#[from] serde_json::Error),
}

/// Parse an inbound push payload. An absent payload is a valid empty one;
/// malformed JSON is an error the caller degrades to the default.
pub fn parse_push_payload(data: Option<&[u8]>) -> Result<PushPayload, PushParseError> {
  match data {
    None => Ok(PushPayload::default()),
    Some(bytes) => Ok(serde_json::from_slice(bytes)?),
  }
}

/// A display notification ready to hand to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: String,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// Metadata carried on the notification so a later tap can be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationData {
  pub story_id: Option<String>,
  /// Deep-link target: `#/detail/<id>` when a story was resolved, the
  /// application root otherwise.
  pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Build the display notification for a parsed payload.
///
/// Story id precedence: the explicit `data.storyId` field wins; failing
/// that the body text is scanned for a `story id: <token>` pattern (some
/// producers only put the id in prose); failing that there is no id and
/// the deep link falls back to the application root.
pub fn build_notification(payload: &PushPayload) -> Notification {
  let body = payload
    .options
    .as_ref()
    .and_then(|o| o.body.clone())
    .unwrap_or_else(|| DEFAULT_BODY.to_string());

  let story_id = payload
    .data
    .as_ref()
    .and_then(|d| d.story_id.clone())
    .or_else(|| story_id_from_body(&body));

  let url = match &story_id {
    Some(id) => format!("#/detail/{}", id),
    None => "#/".to_string(),
  };

  let actions = if story_id.is_some() {
    vec![NotificationAction {
      action: "view".to_string(),
      title: "Lihat Detail".to_string(),
    }]
  } else {
    Vec::new()
  };

  Notification {
    title: payload
      .title
      .clone()
      .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
    body,
    tag: NOTIFICATION_TAG.to_string(),
    data: NotificationData { story_id, url },
    actions,
  }
}

/// Scan body text for `story[-_]?id` followed by separators and a token.
/// Case-insensitive, ASCII; the token is `[A-Za-z0-9_-]+`.
fn story_id_from_body(body: &str) -> Option<String> {
  let bytes = body.as_bytes();
  let n = bytes.len();

  let mut i = 0;
  while i + 7 <= n {
    if bytes[i..i + 5].eq_ignore_ascii_case(b"story") {
      let mut j = i + 5;
      if j < n && (bytes[j] == b'-' || bytes[j] == b'_') {
        j += 1;
      }
      if j + 2 <= n && bytes[j..j + 2].eq_ignore_ascii_case(b"id") {
        j += 2;
        let sep_start = j;
        while j < n && (bytes[j] == b':' || bytes[j].is_ascii_whitespace()) {
          j += 1;
        }
        if j > sep_start {
          let token_start = j;
          while j < n && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_' || bytes[j] == b'-')
          {
            j += 1;
          }
          if j > token_start {
            return Some(body[token_start..j].to_string());
          }
        }
      }
    }
    i += 1;
  }

  None
}

/// In-process navigation message delivered to an already-open context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigateMessage {
  #[serde(rename = "type")]
  pub kind: String,
  pub url: String,
}

impl NavigateMessage {
  pub fn to(url: impl Into<String>) -> Self {
    Self {
      kind: NAVIGATE_MESSAGE_TYPE.to_string(),
      url: url.into(),
    }
  }
}

/// What a notification tap should do.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickRoute {
  /// Focus the open context and deliver the navigation message, keeping
  /// application state.
  Focus(NavigateMessage),
  /// No context open: launch a new one at the deep-linked URL.
  Open(String),
}

/// Pure routing decision for a notification tap.
pub fn route_click(has_open_context: bool, data: &NotificationData) -> ClickRoute {
  if has_open_context {
    ClickRoute::Focus(NavigateMessage::to(data.url.clone()))
  } else {
    ClickRoute::Open(data.url.clone())
  }
}

/// The application contexts a tap can land in. Implemented by the
/// platform shell; tests use a recording implementation.
pub trait SurfaceRegistry {
  fn has_open_context(&self) -> bool;
  fn focus_and_deliver(&self, message: &NavigateMessage);
  fn open(&self, url: &str);
}

/// Apply the routing decision for a tap against the registry.
pub fn dispatch_click(surfaces: &dyn SurfaceRegistry, data: &NotificationData) -> ClickRoute {
  let route = route_click(surfaces.has_open_context(), data);
  match &route {
    ClickRoute::Focus(message) => surfaces.focus_and_deliver(message),
    ClickRoute::Open(url) => surfaces.open(url),
  }
  route
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;

  #[test]
  fn test_absent_payload_parses_to_default() {
    let payload = parse_push_payload(None).unwrap();
    assert_eq!(payload, PushPayload::default());
  }

  #[test]
  fn test_malformed_payload_is_an_error_and_default_recovers() {
    let result = parse_push_payload(Some(b"not json at all"));
    assert!(result.is_err());

    // The documented recovery: fall back to the empty payload.
    let notification = build_notification(&result.unwrap_or_default());
    assert_eq!(notification.title, DEFAULT_TITLE);
    assert_eq!(notification.body, DEFAULT_BODY);
    assert_eq!(notification.data.url, "#/");
    assert!(notification.actions.is_empty());
  }

  #[test]
  fn test_explicit_story_id_wins_over_body_pattern() {
    let payload = parse_push_payload(Some(
      br#"{"title":"Cerita baru","data":{"storyId":"abc-1"},"options":{"body":"story id: zzz"}}"#,
    ))
    .unwrap();

    let notification = build_notification(&payload);
    assert_eq!(notification.data.story_id.as_deref(), Some("abc-1"));
    assert_eq!(notification.data.url, "#/detail/abc-1");
    assert_eq!(notification.actions.len(), 1);
    assert_eq!(notification.actions[0].action, "view");
  }

  #[test]
  fn test_story_id_extracted_from_body_text() {
    for body in [
      "Ada cerita baru! story id: xYz-9",
      "Story_ID\txYz-9 sudah terbit",
      "lihat STORYID: xYz-9",
    ] {
      let payload = PushPayload {
        title: None,
        data: None,
        options: Some(PushOptions {
          body: Some(body.to_string()),
        }),
      };
      let notification = build_notification(&payload);
      assert_eq!(notification.data.story_id.as_deref(), Some("xYz-9"), "body: {}", body);
      assert_eq!(notification.data.url, "#/detail/xYz-9");
    }
  }

  #[test]
  fn test_body_without_pattern_resolves_no_id() {
    let payload = PushPayload {
      title: Some("Halo".to_string()),
      data: None,
      options: Some(PushOptions {
        body: Some("tidak ada id di sini".to_string()),
      }),
    };

    let notification = build_notification(&payload);
    assert_eq!(notification.data.story_id, None);
    assert_eq!(notification.data.url, "#/");
    assert!(notification.actions.is_empty());
  }

  #[test]
  fn test_route_click_focuses_open_context() {
    let data = NotificationData {
      story_id: Some("abc".to_string()),
      url: "#/detail/abc".to_string(),
    };

    match route_click(true, &data) {
      ClickRoute::Focus(message) => {
        assert_eq!(message.kind, NAVIGATE_MESSAGE_TYPE);
        assert_eq!(message.url, "#/detail/abc");
      }
      other => panic!("expected focus, got {:?}", other),
    }

    assert_eq!(route_click(false, &data), ClickRoute::Open("#/detail/abc".to_string()));
  }

  #[test]
  fn test_navigate_message_wire_shape() {
    let message = NavigateMessage::to("#/detail/abc");
    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["type"], "NAVIGATE");
    assert_eq!(json["url"], "#/detail/abc");
  }

  struct RecordingSurfaces {
    open_context: bool,
    delivered: RefCell<Vec<NavigateMessage>>,
    opened: RefCell<Vec<String>>,
  }

  impl RecordingSurfaces {
    fn new(open_context: bool) -> Self {
      Self {
        open_context,
        delivered: RefCell::new(Vec::new()),
        opened: RefCell::new(Vec::new()),
      }
    }
  }

  impl SurfaceRegistry for RecordingSurfaces {
    fn has_open_context(&self) -> bool {
      self.open_context
    }

    fn focus_and_deliver(&self, message: &NavigateMessage) {
      self.delivered.borrow_mut().push(message.clone());
    }

    fn open(&self, url: &str) {
      self.opened.borrow_mut().push(url.to_string());
    }
  }

  #[test]
  fn test_dispatch_click_delivers_or_opens() {
    let data = NotificationData {
      story_id: None,
      url: "#/".to_string(),
    };

    let focused = RecordingSurfaces::new(true);
    dispatch_click(&focused, &data);
    assert_eq!(focused.delivered.borrow().len(), 1);
    assert!(focused.opened.borrow().is_empty());

    let fresh = RecordingSurfaces::new(false);
    dispatch_click(&fresh, &data);
    assert!(fresh.delivered.borrow().is_empty());
    assert_eq!(*fresh.opened.borrow(), vec!["#/".to_string()]);
  }
}
