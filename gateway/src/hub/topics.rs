//! Hub MQTT topic conventions

use std::collections::HashMap;

/// Topic filter for desired-property patches.
pub const DESIRED_PATCH_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";

/// Topic filter for twin request responses.
pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";

/// Topic filter for direct-method requests.
pub const METHODS_FILTER: &str = "$iothub/methods/POST/#";

/// Hub topic patterns
pub struct Topics;

impl Topics {
    /// Telemetry events for a leaf device
    pub fn device_events(device_id: &str) -> String {
        format!("devices/{}/messages/events/", device_id)
    }

    /// Telemetry events for a module
    pub fn module_events(device_id: &str, module_id: &str) -> String {
        format!("devices/{}/modules/{}/messages/events/", device_id, module_id)
    }

    /// Routed input messages for a module
    pub fn module_inputs_filter(device_id: &str, module_id: &str) -> String {
        format!("devices/{}/modules/{}/inputs/#", device_id, module_id)
    }

    /// Reported-property patch publication
    pub fn twin_reported(request_id: u64) -> String {
        format!("$iothub/twin/PATCH/properties/reported/?$rid={}", request_id)
    }

    /// Full twin fetch request
    pub fn twin_get(request_id: u64) -> String {
        format!("$iothub/twin/GET/?$rid={}", request_id)
    }

    /// Direct-method response publication
    pub fn method_response(request_id: &str, status: u16) -> String {
        format!("$iothub/methods/res/{}/?$rid={}", status, request_id)
    }

    /// Check whether a topic is a desired-property patch.
    pub fn is_desired_patch(topic: &str) -> bool {
        topic.starts_with("$iothub/twin/PATCH/properties/desired/")
    }

    /// Parse a direct-method request topic into (method name, request id).
    pub fn parse_method(topic: &str) -> Option<(String, String)> {
        let rest = topic.strip_prefix("$iothub/methods/POST/")?;
        let (name, tail) = rest.split_once('/')?;
        let request_id = tail.strip_prefix("?$rid=")?;
        if name.is_empty() || request_id.is_empty() {
            return None;
        }
        Some((name.to_string(), request_id.to_string()))
    }

    /// Parse a twin response topic into (status, request id).
    pub fn parse_twin_response(topic: &str) -> Option<(u16, String)> {
        let rest = topic.strip_prefix("$iothub/twin/res/")?;
        let (status, tail) = rest.split_once('/')?;
        let status = status.parse::<u16>().ok()?;
        let query = tail.strip_prefix('?')?;
        let request_id = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("$rid="))?;
        Some((status, request_id.to_string()))
    }

    /// Parse a module input topic into (input name, application properties).
    pub fn parse_module_input(topic: &str) -> Option<(String, HashMap<String, String>)> {
        let marker = "/inputs/";
        let index = topic.find(marker)?;
        let rest = &topic[index + marker.len()..];

        let (input, bag) = match rest.split_once("/?") {
            Some((input, bag)) => (input, bag),
            None => (rest.trim_end_matches('/'), ""),
        };
        if input.is_empty() {
            return None;
        }

        let mut properties = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(bag.as_bytes()) {
            properties.insert(key.into_owned(), value.into_owned());
        }

        Some((input.to_string(), properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_generation() {
        assert_eq!(
            Topics::device_events("cam1"),
            "devices/cam1/messages/events/"
        );
        assert_eq!(
            Topics::module_events("edge1", "lensgate"),
            "devices/edge1/modules/lensgate/messages/events/"
        );
        assert_eq!(
            Topics::twin_reported(7),
            "$iothub/twin/PATCH/properties/reported/?$rid=7"
        );
        assert_eq!(
            Topics::method_response("12", 202),
            "$iothub/methods/res/202/?$rid=12"
        );
    }

    #[test]
    fn test_parse_method_topic() {
        assert_eq!(
            Topics::parse_method("$iothub/methods/POST/cmStartPipeline/?$rid=3"),
            Some(("cmStartPipeline".to_string(), "3".to_string()))
        );
        assert_eq!(Topics::parse_method("$iothub/methods/POST/"), None);
        assert_eq!(Topics::parse_method("devices/cam1/messages/events/"), None);
    }

    #[test]
    fn test_parse_twin_response_topic() {
        assert_eq!(
            Topics::parse_twin_response("$iothub/twin/res/200/?$rid=9&$version=2"),
            Some((200, "9".to_string()))
        );
        assert_eq!(Topics::parse_twin_response("$iothub/twin/res/abc/?$rid=9"), None);
    }

    #[test]
    fn test_parse_module_input_topic() {
        let (input, props) = Topics::parse_module_input(
            "devices/edge1/modules/lensgate/inputs/pipeline-telemetry/?subject=%2FgraphInstances%2Fdet-cam1%2Fprocessor",
        )
        .unwrap();

        assert_eq!(input, "pipeline-telemetry");
        assert_eq!(
            props.get("subject").map(String::as_str),
            Some("/graphInstances/det-cam1/processor")
        );
    }

    #[test]
    fn test_parse_module_input_without_bag() {
        let (input, props) =
            Topics::parse_module_input("devices/edge1/modules/lensgate/inputs/camera-commands/")
                .unwrap();

        assert_eq!(input, "camera-commands");
        assert!(props.is_empty());
    }

    #[test]
    fn test_desired_patch_detection() {
        assert!(Topics::is_desired_patch(
            "$iothub/twin/PATCH/properties/desired/?$version=4"
        ));
        assert!(!Topics::is_desired_patch("$iothub/twin/res/200/?$rid=1"));
    }
}
