use crate::config::ConfigError;
use crate::render::RenderError;
use crate::workbook::WorkbookError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn insert(table: &str, e: rusqlite::Error) -> Self {
        Self::new("db_insert_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn update(table: &str, e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<WorkbookError> for HandlerErr {
    fn from(e: WorkbookError) -> Self {
        match e {
            WorkbookError::Missing(ref path) => {
                let path = path.to_string_lossy().to_string();
                HandlerErr::new("template_unavailable", e.to_string())
                    .with_details(json!({ "path": path }))
            }
            WorkbookError::SheetMissing(_) => HandlerErr::new("not_found", e.to_string()),
            _ => HandlerErr::new("workbook_failed", e.to_string()),
        }
    }
}

impl From<RenderError> for HandlerErr {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Workbook(w) => w.into(),
            RenderError::UnknownPage(_) => HandlerErr::bad_params(e.to_string()),
            RenderError::Qr(_) => HandlerErr::new("render_failed", e.to_string()),
        }
    }
}

impl From<ConfigError> for HandlerErr {
    fn from(e: ConfigError) -> Self {
        HandlerErr::new("config_invalid", e.to_string())
    }
}
