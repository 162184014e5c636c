mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{closed_port_url, ok, init_tracing, FakeServer, Recorded};
use iphone::{AutomationError, ClientConfig, Phone, ScreenContext, ScrollOutcome, WdaClient};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers session endpoints for `S1` and `{"value": null}` for anything `route` leaves alone.
fn wda_server<F>(route: F) -> FakeServer
where
    F: Fn(&Recorded) -> Option<(u16, String)> + Send + 'static,
{
    FakeServer::start(move |req| {
        if let Some(reply) = route(req) {
            return reply;
        }
        match (req.method.as_str(), req.path()) {
            ("POST", "/session") => ok(json!({"sessionId": "S1", "value": {"sessionId": "S1", "capabilities": {}}})),
            ("GET", "/session/S1") => ok(json!({"sessionId": "S1", "value": {}})),
            _ => ok(json!({"value": null})),
        }
    })
}

fn reject_actions(req: &Recorded) -> Option<(u16, String)> {
    (req.path().ends_with("/actions"))
        .then(|| (500, json!({"value": {"error": "unknown command"}}).to_string()))
}

fn client(server: &FakeServer) -> WdaClient {
    WdaClient::with_timeout(&server.url, Duration::from_secs(5)).unwrap()
}

#[test]
fn test_tap_uses_pointer_actions() {
    init_tracing();
    let server = wda_server(|_| None);
    client(&server).tap(120, 340).unwrap();

    let actions = server.find("POST", "/session/S1/actions");
    assert_eq!(actions.len(), 1);
    let body = actions[0].json();
    assert_eq!(body["actions"][0]["id"], "finger1");
    assert_eq!(body["actions"][0]["actions"][0], json!({"type": "pointerMove", "duration": 0, "x": 120, "y": 340}));
    assert_eq!(server.count("POST", "/session/S1/wda/tap"), 0);
}

#[test]
fn test_tap_falls_back_to_legacy_endpoint() {
    init_tracing();
    let server = wda_server(reject_actions);
    client(&server).tap(120, 340).unwrap();

    let legacy = server.find("POST", "/session/S1/wda/tap");
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0].json(), json!({"x": 120, "y": 340}));
    assert_eq!(server.count("POST", "/session/S1/actions"), 1);
}

#[test]
fn test_swipe_fallback_keeps_requested_duration() {
    init_tracing();
    let server = wda_server(reject_actions);
    client(&server).swipe(200, 600, 200, 200, 2.0).unwrap();

    let attempted = server.find("POST", "/session/S1/actions");
    assert_eq!(attempted[0].json()["actions"][0]["actions"][2]["duration"], 300);

    let drag = server.find("POST", "/session/S1/wda/dragfromtoforduration");
    assert_eq!(drag.len(), 1);
    assert_eq!(
        drag[0].json(),
        json!({"fromX": 200, "fromY": 600, "toX": 200, "toY": 200, "duration": 2.0})
    );
}

#[test]
fn test_session_created_once_and_verified_per_operation() {
    init_tracing();
    let server = wda_server(|_| None);
    let mut wda = client(&server);

    wda.tap(10, 10).unwrap();
    wda.type_text("hi").unwrap();
    wda.tap(20, 20).unwrap();

    assert_eq!(server.count("POST", "/session"), 1);
    assert_eq!(server.count("GET", "/session/S1"), 2);
    assert_eq!(
        server.find("POST", "/session/S1/wda/keys")[0].json(),
        json!({"value": ["h", "i"]})
    );
    assert_eq!(wda.session_id(), Some("S1"));
}

#[test]
fn test_dead_session_is_recreated() {
    init_tracing();
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let server = wda_server(move |req| match (req.method.as_str(), req.path()) {
        ("POST", "/session") => {
            let id = format!("S{}", counter.fetch_add(1, Ordering::SeqCst) + 1);
            Some(ok(json!({"value": {"sessionId": id}})))
        }
        ("GET", "/session/S1") => Some((404, json!({"value": {"error": "invalid session id"}}).to_string())),
        ("GET", "/session/S2") => Some(ok(json!({"sessionId": "S2", "value": {}}))),
        _ => None,
    });
    let mut wda = client(&server);

    wda.tap(1, 1).unwrap();
    wda.tap(2, 2).unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(server.count("POST", "/session/S1/actions"), 1);
    assert_eq!(server.count("POST", "/session/S2/actions"), 1);
    assert_eq!(wda.session_id(), Some("S2"));
}

#[test]
fn test_invalidated_session_is_not_verified() {
    let server = wda_server(|_| None);
    let mut wda = client(&server);
    wda.tap(1, 1).unwrap();
    wda.invalidate_session();
    wda.tap(1, 1).unwrap();
    assert_eq!(server.count("POST", "/session"), 2);
    assert_eq!(server.count("GET", "/session/S1"), 0);
}

#[test]
fn test_session_creation_failure_is_remote_unavailable() {
    let server = wda_server(|req| (req.path() == "/session").then(|| (500, "boom".to_string())));
    let err = client(&server).tap(1, 1).unwrap_err();
    assert!(matches!(err, AutomationError::RemoteUnavailable(_)), "got {err:?}");
}

#[test]
fn test_unreachable_server_is_remote_unavailable() {
    let url = closed_port_url();
    let mut wda = WdaClient::with_timeout(&url, Duration::from_secs(2)).unwrap();
    assert!(matches!(wda.tap(1, 1), Err(AutomationError::RemoteUnavailable(_))));
    assert!(matches!(wda.press_home(), Err(AutomationError::RemoteUnavailable(_))));
}

#[test]
fn test_http_error_carries_status_and_body() {
    let server = wda_server(|req| (req.path() == "/screenshot").then(|| (503, "busy".to_string())));
    match client(&server).screenshot_base64() {
        Err(AutomationError::HttpStatus { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "busy");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_clipboard_is_base64_on_the_wire() {
    let encoded = STANDARD.encode("héllo");
    let server = wda_server(move |req| {
        (req.path() == "/session/S1/wda/getPasteboard").then(|| ok(json!({"value": encoded.clone()})))
    });
    let mut wda = client(&server);

    assert_eq!(wda.get_clipboard().unwrap(), "héllo");
    wda.set_clipboard("hi").unwrap();
    assert_eq!(
        server.find("POST", "/session/S1/wda/setPasteboard")[0].json(),
        json!({"content": "aGk=", "contentType": "plaintext"})
    );
}

#[test]
fn test_clear_text_without_focus() {
    let server = wda_server(|req| {
        (req.path() == "/session/S1/elements").then(|| ok(json!({"value": []})))
    });
    let result = client(&server).clear_text().unwrap();

    assert_eq!(result, json!({"status": "no_focused_element"}));
    assert_eq!(
        server.find("POST", "/session/S1/elements")[0].json(),
        json!({"using": "predicate string", "value": "hasFocus == true"})
    );
    assert!(server.requests().iter().all(|r| !r.url.ends_with("/clear")));
}

#[test]
fn test_clear_text_with_focus() {
    let server = wda_server(|req| {
        (req.path() == "/session/S1/elements").then(|| ok(json!({"value": [{"ELEMENT": "E7"}]})))
    });
    client(&server).clear_text().unwrap();
    assert_eq!(server.count("POST", "/session/S1/element/E7/clear"), 1);
}

#[test]
fn test_find_by_text_collects_positions() {
    init_tracing();
    let server = wda_server(|req| {
        let reply = match req.path() {
            "/session/S1/elements" => ok(json!({"value": [
                {"ELEMENT": "A"},
                {"element-6066-11e4-a52e-4f735466cecf": "B"},
                {"ELEMENT": "C"}
            ]})),
            "/session/S1/element/A/rect" => ok(json!({"value": {"x": 10, "y": 100, "width": 100, "height": 40}})),
            "/session/S1/element/B/rect" => ok(json!({"value": {"x": 0.5, "y": 880.0, "width": 50.0, "height": 20.0}})),
            "/session/S1/element/C/rect" => (404, json!({"value": {"error": "stale element"}}).to_string()),
            "/session/S1/element/A/attribute/label" => ok(json!({"value": "Send"})),
            "/session/S1/element/B/attribute/label" => ok(json!({"value": "Send later"})),
            "/session/S1/element/A/name" => ok(json!({"value": "XCUIElementTypeButton"})),
            _ => return None,
        };
        Some(reply)
    });
    let matches = client(&server).find_by_text("Send").unwrap();

    assert_eq!(
        server.find("POST", "/session/S1/elements")[0].json()["value"],
        r#"label CONTAINS "Send" OR name CONTAINS "Send" OR value CONTAINS "Send""#
    );
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].element_id.as_deref(), Some("A"));
    assert_eq!(matches[0].center, (60, 120));
    assert_eq!(matches[0].kind.as_deref(), Some("Button"));
    assert_eq!(matches[0].label.as_deref(), Some("Send"));
    assert_eq!(matches[1].center, (25, 890));
    assert_eq!(matches[1].label.as_deref(), Some("Send later"));
    // One session lookup for the whole search.
    assert_eq!(server.count("POST", "/session"), 1);
    assert_eq!(server.count("GET", "/session/S1"), 0);
}

#[test]
fn test_alert_text_absent_and_present() {
    let server = wda_server(|req| {
        (req.path() == "/session/S1/alert/text")
            .then(|| (404, json!({"value": {"error": "no such alert"}}).to_string()))
    });
    assert_eq!(client(&server).alert_text().unwrap(), None);

    let server = wda_server(|req| {
        (req.path() == "/session/S1/alert/text").then(|| ok(json!({"value": "Allow access?"})))
    });
    assert_eq!(client(&server).alert_text().unwrap().as_deref(), Some("Allow access?"));
}

#[test]
fn test_scroll_down_swipes_through_screen_center() {
    let server = wda_server(|req| {
        (req.path() == "/session/S1/window/size").then(|| ok(json!({"value": {"width": 390, "height": 844}})))
    });
    client(&server).scroll_down(300).unwrap();

    let body = server.find("POST", "/session/S1/actions")[0].json();
    let steps = &body["actions"][0]["actions"];
    assert_eq!((steps[0]["x"].as_i64(), steps[0]["y"].as_i64()), (Some(195), Some(572)));
    assert_eq!((steps[2]["x"].as_i64(), steps[2]["y"].as_i64()), (Some(195), Some(272)));
    assert_eq!(server.count("POST", "/session"), 1);
}

#[test]
fn test_interactive_elements_from_source() {
    let server = wda_server(|req| {
        (req.path() == "/source").then(|| {
            ok(json!({"value": {
                "type": "XCUIElementTypeApplication",
                "name": "Settings",
                "rect": {"x": 0, "y": 0, "width": 390, "height": 844},
                "children": [
                    {"type": "XCUIElementTypeOther", "children": [
                        {"type": "XCUIElementTypeButton", "label": "Wi-Fi",
                         "rect": {"x": 0, "y": 200, "width": 390, "height": 44}},
                        {"type": "XCUIElementTypeOther"}
                    ]},
                    {"type": "XCUIElementTypeSwitch", "label": "Airplane Mode", "value": "1",
                     "frame": "{{300, 150}, {51, 31}}"}
                ]
            }}))
        })
    });
    let phone = Phone::new(ClientConfig::default().with_wda_url(&server.url)).unwrap();
    let elements = phone.interactive_elements().unwrap();

    assert!(server.requests()[0].url.contains("format=json"));
    assert_eq!(elements.len(), 2);
    assert_eq!(elements.get(1).unwrap().label, "Wi-Fi");
    assert_eq!(elements.get(2).unwrap().center, (325, 165));
    assert_eq!(elements.get(2).unwrap().value.as_deref(), Some("1"));
    assert!(matches!(elements.get(3), Err(AutomationError::NotFound(_))));
}

#[test]
fn test_scroll_to_scrolls_then_taps() {
    init_tracing();
    let rect_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&rect_calls);
    let server = wda_server(move |req| {
        let reply = match req.path() {
            "/session/S1/elements" => ok(json!({"value": [{"ELEMENT": "A"}]})),
            "/session/S1/element/A/rect" => {
                let y = if calls.fetch_add(1, Ordering::SeqCst) == 0 { 900 } else { 400 };
                ok(json!({"value": {"x": 10, "y": y, "width": 100, "height": 40}}))
            }
            "/session/S1/element/A/attribute/label" => ok(json!({"value": "Post your reply"})),
            _ => return None,
        };
        Some(reply)
    });
    let mut phone = Phone::new(ClientConfig::default().with_wda_url(&server.url)).unwrap();
    let outcome = phone.scroll_to("Post your reply", true).unwrap();

    assert!(matches!(outcome, ScrollOutcome::FoundAndTapped { center: (60, 420), .. }));
    let gestures = server.find("POST", "/session/S1/actions");
    assert_eq!(gestures.len(), 2);
    let swipe = gestures[0].json();
    assert_eq!(swipe["actions"][0]["id"], "swipe1");
    assert_eq!(swipe["actions"][0]["actions"][0]["y"], 600);
    assert_eq!(swipe["actions"][0]["actions"][2]["y"], 200);
    assert_eq!(gestures[1].json()["actions"][0]["actions"][0]["y"], 420);
    assert_eq!(phone.last_result().map(|m| m.center), Some((60, 420)));
}

#[test]
fn test_context_survives_broken_alert_lookup() {
    init_tracing();
    let server = wda_server(|req| match req.path() {
        "/session/S1/window/size" => Some(ok(json!({"value": {"width": 390, "height": 844}}))),
        "/session/S1/alert/text" => Some((200, "<html>not json</html>".to_string())),
        _ => None,
    });
    let mut wda = client(&server);

    let context = ScreenContext::capture(&mut wda, false).unwrap();
    assert_eq!(context.alert, None);
    assert_eq!((context.screen_width, context.screen_height), (390, 844));
    assert_eq!(server.count("GET", "/session/S1/alert/text"), 1);
}
