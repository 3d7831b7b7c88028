//! Generated SQL text.
//!
//! Everything here is pure string building. Identifiers arrive through the
//! validated nominal types; table references are caller-supplied and get
//! double-quote escaping instead.

use crate::ident::{ChannelName, FunctionName, TriggerName};

/// Quote an identifier for use in SQL (double quotes).
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a string literal for use in SQL (single quotes, embedded `'`
/// doubled).
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote a possibly schema-qualified table name
/// (e.g., "public.users" -> "public"."users").
pub fn quote_table_name(s: &str) -> String {
    if let Some((schema, table)) = s.split_once('.') {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    } else {
        quote_ident(s)
    }
}

/// Parse a table reference into (schema, table).
/// If no schema is specified, defaults to "public".
pub fn parse_table_ref(table_ref: &str) -> (&str, &str) {
    if let Some((schema, table)) = table_ref.split_once('.') {
        (schema, table)
    } else {
        ("public", table_ref)
    }
}

/// Row-level trigger events a channel can be wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEvent {
    Insert,
    Update,
    Delete,
}

impl TableEvent {
    pub const ALL: [TableEvent; 3] = [TableEvent::Insert, TableEvent::Update, TableEvent::Delete];

    pub fn as_sql(&self) -> &'static str {
        match self {
            TableEvent::Insert => "INSERT",
            TableEvent::Update => "UPDATE",
            TableEvent::Delete => "DELETE",
        }
    }
}

pub fn listen_sql(channel: &ChannelName) -> String {
    format!("LISTEN {}", quote_ident(channel.as_str()))
}

pub fn unlisten_sql(channel: &ChannelName) -> String {
    format!("UNLISTEN {}", quote_ident(channel.as_str()))
}

/// One NOTIFY statement with the payload embedded as an escaped literal.
///
/// The payload must already be size-checked; this only handles quoting.
pub fn notify_sql(channel: &ChannelName, payload: &str) -> String {
    format!(
        "NOTIFY {}, {}",
        quote_ident(channel.as_str()),
        quote_literal(payload)
    )
}

/// Trigger function that emits the affected row as a JSON payload.
///
/// DELETE publishes the old row, everything else the new one. AFTER triggers
/// ignore the return value, so the function returns NULL.
pub fn create_trigger_function_sql(function: &FunctionName, channel: &ChannelName) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {f}() RETURNS trigger AS $$
DECLARE
    row_data json;
BEGIN
    IF TG_OP = 'DELETE' THEN
        row_data := row_to_json(OLD);
    ELSE
        row_data := row_to_json(NEW);
    END IF;
    PERFORM pg_notify({c}, row_data::text);
    RETURN NULL;
END;
$$ LANGUAGE plpgsql"#,
        f = quote_ident(function.as_str()),
        c = quote_literal(channel.as_str()),
    )
}

pub fn drop_trigger_function_sql(function: &FunctionName) -> String {
    format!("DROP FUNCTION IF EXISTS {}()", quote_ident(function.as_str()))
}

pub fn create_trigger_sql(
    trigger: &TriggerName,
    table: &str,
    function: &FunctionName,
    events: &[TableEvent],
) -> String {
    let events = if events.is_empty() {
        &TableEvent::ALL[..]
    } else {
        events
    };

    let events = events
        .iter()
        .map(TableEvent::as_sql)
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        "CREATE TRIGGER {t} AFTER {events} ON {table} FOR EACH ROW EXECUTE FUNCTION {f}()",
        t = quote_ident(trigger.as_str()),
        table = quote_table_name(table),
        f = quote_ident(function.as_str()),
    )
}

pub fn drop_trigger_sql(trigger: &TriggerName, table: &str) -> String {
    format!(
        "DROP TRIGGER IF EXISTS {} ON {}",
        quote_ident(trigger.as_str()),
        quote_table_name(table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelName {
        ChannelName::new("orders").unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("my\"table"), "\"my\"\"table\"");
    }

    #[test]
    fn test_quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("''"), "''''''");
    }

    #[test]
    fn test_quote_table_name() {
        assert_eq!(quote_table_name("users"), "\"users\"");
        assert_eq!(quote_table_name("public.users"), "\"public\".\"users\"");
    }

    #[test]
    fn test_parse_table_ref() {
        assert_eq!(parse_table_ref("public.users"), ("public", "users"));
        assert_eq!(parse_table_ref("users"), ("public", "users"));
    }

    #[test]
    fn test_listen_unlisten() {
        assert_eq!(listen_sql(&channel()), "LISTEN \"orders\"");
        assert_eq!(unlisten_sql(&channel()), "UNLISTEN \"orders\"");
    }

    #[test]
    fn test_notify_sql_escapes_payload() {
        assert_eq!(
            notify_sql(&channel(), r#"{"status":"it's shipped"}"#),
            r#"NOTIFY "orders", '{"status":"it''s shipped"}'"#
        );
    }

    #[test]
    fn test_create_trigger_function_sql() {
        let function = FunctionName::new("orders_notify_fn").unwrap();
        let sql = create_trigger_function_sql(&function, &channel());

        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION \"orders_notify_fn\"()"));
        assert!(sql.contains("pg_notify('orders', row_data::text)"));
        assert!(sql.contains("row_to_json(OLD)"));
        assert!(sql.contains("row_to_json(NEW)"));
        assert!(sql.contains("LANGUAGE plpgsql"));
    }

    #[test]
    fn test_create_trigger_sql() {
        let trigger = TriggerName::new("orders_notify_trg").unwrap();
        let function = FunctionName::new("orders_notify_fn").unwrap();

        let sql = create_trigger_sql(
            &trigger,
            "public.orders",
            &function,
            &[TableEvent::Insert, TableEvent::Update],
        );
        assert_eq!(
            sql,
            "CREATE TRIGGER \"orders_notify_trg\" AFTER INSERT OR UPDATE ON \
             \"public\".\"orders\" FOR EACH ROW EXECUTE FUNCTION \"orders_notify_fn\"()"
        );
    }

    #[test]
    fn test_create_trigger_sql_defaults_to_all_events() {
        let trigger = TriggerName::new("t").unwrap();
        let function = FunctionName::new("f").unwrap();

        let sql = create_trigger_sql(&trigger, "orders", &function, &[]);
        assert!(sql.contains("AFTER INSERT OR UPDATE OR DELETE ON"));
    }

    #[test]
    fn test_drop_statements_are_idempotent_forms() {
        let trigger = TriggerName::new("orders_notify_trg").unwrap();
        let function = FunctionName::new("orders_notify_fn").unwrap();

        assert_eq!(
            drop_trigger_sql(&trigger, "orders"),
            "DROP TRIGGER IF EXISTS \"orders_notify_trg\" ON \"orders\""
        );
        assert_eq!(
            drop_trigger_function_sql(&function),
            "DROP FUNCTION IF EXISTS \"orders_notify_fn\"()"
        );
    }
}
