//! Purpose: Built-in `lights` service for trying the server without writing a plugin.
//! Exports: `lights`, `cycle_brightness`, `FIRST_BULB_ID`.
//! Role: Registered by `serve --demo`; also drives change streams when ticking.
//! Invariants: Seeded element ids are fixed so URLs in docs and tests stay valid.
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use switchyard::api::{
    Capabilities, Capability, Element, MemoryResource, Payload, Resource, Service,
};

pub const FIRST_BULB_ID: &str = "550e8400-e29b-41d4-a716-446655440000";

const BULBS: [(&str, &str, i64, &str); 3] = [
    (FIRST_BULB_ID, "Kitchen", 80, "#ffd08a"),
    ("6ba7b810-9dad-11d1-80b4-00c04fd430c8", "Hallway", 40, "#ffffff"),
    ("7c9e6679-7425-40de-944b-e07fc1f90ae7", "Porch", 0, "#ff8800"),
];

const SWITCHES: [(&str, &str, bool); 2] = [
    ("9b2d6a1e-3c4f-4e8a-b6d2-1f0a7c5e9d31", "Front door", true),
    ("c1e0f5a2-7b3d-4a9e-8f6c-2d4b8a0e1c57", "Garage", false),
];

const BRIGHTNESS_STEP: i64 = 10;

/// The `lights` service and a handle on its `bulbs` resource for the ticker.
pub fn lights() -> (Service, Arc<MemoryResource>) {
    let bulbs = Arc::new(MemoryResource::new("lights", "bulbs", Capabilities::all()));
    for (id, name, brightness, color) in BULBS {
        bulbs.insert_with_id(
            id,
            object(json!({
                "name": name,
                "brightness": brightness,
                "color": color,
                "vendor": "switchyard",
            })),
        );
    }

    let switches = Arc::new(MemoryResource::new(
        "lights",
        "switches",
        Capabilities::none()
            .with(Capability::List)
            .with(Capability::Get),
    ));
    for (id, name, on) in SWITCHES {
        switches.insert_with_id(id, object(json!({ "name": name, "on": on })));
    }

    let service = Service::new("lights")
        .with_resource(Arc::clone(&bulbs) as Arc<dyn Resource>)
        .with_resource(switches);
    (service, bulbs)
}

/// Step the first bulb's brightness every `period`, wrapping at 100.
pub async fn cycle_brightness(bulbs: Arc<MemoryResource>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(cell) = bulbs.cell(FIRST_BULB_ID) else {
            tracing::debug!("demo bulb removed; ticker stopped");
            return;
        };
        let current = cell
            .snapshot()
            .get("brightness")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let next = next_brightness(current);
        bulbs.update(FIRST_BULB_ID, object(json!({ "brightness": next })));
        tracing::trace!(brightness = next, "demo tick");
    }
}

fn next_brightness(current: i64) -> i64 {
    let next = current + BRIGHTNESS_STEP;
    if next > 100 { 0 } else { next }
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{FIRST_BULB_ID, cycle_brightness, lights, next_brightness};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use switchyard::api::{Capability, Element, Registry, Resource};

    #[test]
    fn demo_service_registers() {
        let (service, _) = lights();
        let registry = Registry::builder().service(service).build().expect("registry");
        let bulbs = registry.resolve("LIGHTS", "Bulbs").expect("bulbs");
        assert_eq!(bulbs.resource().list(None, None).expect("list").len(), 3);
        let switches = registry.resolve("lights", "switches").expect("switches");
        let caps = switches.resource().capabilities();
        assert!(caps.has(Capability::Get));
        assert!(!caps.has(Capability::Update));
        assert!(!caps.has(Capability::ElementSubscribe));
    }

    #[test]
    fn seeded_bulbs_carry_identity_fields() {
        let (_, bulbs) = lights();
        let payload = bulbs.cell(FIRST_BULB_ID).expect("bulb").snapshot();
        assert_eq!(payload["name"], json!("Kitchen"));
        assert_eq!(payload["uri"], json!(format!("/lights/bulbs/{FIRST_BULB_ID}")));
        assert_eq!(payload["vendor"], json!("switchyard"));
    }

    #[test]
    fn brightness_wraps() {
        assert_eq!(next_brightness(80), 90);
        assert_eq!(next_brightness(100), 0);
        assert_eq!(next_brightness(95), 0);
    }

    #[tokio::test]
    async fn ticker_drives_element_changes() {
        let (_, bulbs) = lights();
        let cell = bulbs.cell(FIRST_BULB_ID).expect("bulb");
        let mut changes = cell.changes();
        let ticker = tokio::spawn(cycle_brightness(Arc::clone(&bulbs), Duration::from_millis(5)));

        let seen: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            changes.by_ref().take(3).collect::<Vec<_>>(),
        )
        .await
        .expect("ticks");
        ticker.abort();

        let levels: Vec<_> = seen
            .into_iter()
            .map(|payload| payload.expect("ok")["brightness"].clone())
            .collect();
        assert_eq!(levels, vec![json!(80), json!(90), json!(100)]);
    }
}
