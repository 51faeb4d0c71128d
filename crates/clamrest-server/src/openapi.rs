//! OpenAPI document served at `/api/v1/doc`.

use serde_json::{Value, json};

pub const TITLE: &str = "ClamAV REST service";
pub const API_VERSION: &str = "1.0";
pub const DESCRIPTION: &str = "Sandboxed file scanning with ClamAV via REST API";

fn info_schema(example: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string", "example": example },
            "details": { "type": "array", "items": { "type": "string" } },
        },
    })
}

fn json_response(description: &str, schema: Value) -> Value {
    json!({
        "description": description,
        "content": { "application/json": { "schema": schema } },
    })
}

/// Build the OpenAPI 3 document describing the HTTP API.
pub fn document() -> Value {
    let error = json!({ "$ref": "#/components/schemas/Error" });
    let ping = json!({
        "tags": ["status"],
        "summary": "Ping clamd ensuring the connection is up",
        "responses": {
            "200": json_response("clamd answered PONG", json!({ "$ref": "#/components/schemas/Ping" })),
            "503": json_response("clamd is unreachable or unhealthy", json!({ "$ref": "#/components/schemas/Ping" })),
        },
    });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": TITLE,
            "version": API_VERSION,
            "description": DESCRIPTION,
        },
        "paths": {
            "/health": { "get": ping.clone() },
            "/api/v1/clamav/ping": { "get": ping },
            "/api/v1/clamav/version": {
                "get": {
                    "tags": ["status"],
                    "summary": "Version of the connected clamd",
                    "responses": {
                        "200": json_response("clamd version", info_schema("ClamAV 1.4.2")),
                        "503": json_response("clamd is unreachable", error.clone()),
                    },
                },
            },
            "/api/v1/clamav/stats": {
                "get": {
                    "tags": ["status"],
                    "summary": "clamd statistics",
                    "responses": {
                        "200": json_response("clamd stats", info_schema("POOLS: 1 ... END")),
                        "503": json_response("clamd is unreachable", error.clone()),
                    },
                },
            },
            "/api/v1/clamav/scan": {
                "post": {
                    "tags": ["scan"],
                    "summary": "Scan a file attached to the request",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "multipart/form-data": {
                                "schema": {
                                    "type": "object",
                                    "required": ["file"],
                                    "properties": {
                                        "file": { "type": "string", "format": "binary" },
                                    },
                                },
                            },
                        },
                    },
                    "responses": {
                        "200": json_response("Scan completed: OK or FOUND", json!({ "$ref": "#/components/schemas/Scan" })),
                        "400": json_response("No file attached", error.clone()),
                        "413": json_response("Upload exceeds the service or clamd limit", error.clone()),
                        "500": json_response("clamd reported an error or an unparseable reply", json!({ "$ref": "#/components/schemas/Scan" })),
                        "503": json_response("clamd is unreachable", error),
                    },
                },
            },
        },
        "components": {
            "schemas": {
                "Ping": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string", "enum": ["OK", "KO"] },
                        "message": { "type": "string", "example": "PONG" },
                    },
                },
                "Scan": {
                    "type": "object",
                    "properties": {
                        "status": {
                            "type": "string",
                            "enum": ["OK", "FOUND", "ERROR", "CLIENT_PARSE_ERROR"],
                        },
                        "input_file": { "type": "string", "example": "myfile.txt" },
                        "virus": { "type": "string", "nullable": true, "example": "Win.Test.EICAR_HDB-1" },
                        "error": { "type": "string", "nullable": true },
                        "file_size": { "type": "integer", "example": 256 },
                        "details": { "type": "array", "items": { "type": "string" } },
                        "raw_data": { "type": "string" },
                    },
                },
                "Error": {
                    "type": "object",
                    "properties": { "error": { "type": "string" } },
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_api_path() {
        let doc = document();
        assert_eq!(doc["info"]["title"], TITLE);
        for path in [
            "/health",
            "/api/v1/clamav/ping",
            "/api/v1/clamav/version",
            "/api/v1/clamav/stats",
            "/api/v1/clamav/scan",
        ] {
            assert!(doc["paths"][path].is_object(), "missing {path}");
        }
        assert!(doc["paths"]["/api/v1/clamav/scan"]["post"].is_object());
    }
}
