use crate::mcp::protocol::Tool;
use serde_json::json;

pub const IMAGE_SEARCH: &str = "image_search";
pub const HEALTH_CHECK: &str = "health_check";

/// Get all available MCP tools
pub fn get_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: IMAGE_SEARCH.to_string(),
            description: "Find catalog products that look like the given image, optionally \
                          filtered by price range and brand"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image_url": {
                        "type": "string",
                        "description": "HTTP(S) URL or local path of the query image"
                    },
                    "min_price": {
                        "type": "number",
                        "description": "Lowest acceptable price (inclusive)"
                    },
                    "max_price": {
                        "type": "number",
                        "description": "Highest acceptable price (inclusive)"
                    },
                    "brand": {
                        "type": "string",
                        "description": "Brand name, matched case-insensitively"
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "Maximum number of results to return",
                        "minimum": 1,
                        "default": 5
                    }
                },
                "required": ["image_url"]
            }),
        },
        Tool {
            name: HEALTH_CHECK.to_string(),
            description: "Liveness check".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}
