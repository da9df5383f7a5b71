//! Built-in dataset used when nothing has been persisted yet.

use crate::automation::{Automation, AutomationAction, AutomationTrigger};
use crate::persistence::PersistedState;
use crate::schema::{
    ColumnDefinition, ColumnPermissionMatrix, ColumnStyle, ColumnValidation, PermissionMatrix,
    Role, Row, SavedView, TableDefinition, ViewMode,
};
use crate::value::{CellValue, ColumnType};
use chrono::{Duration, Utc};
use std::collections::BTreeMap;

const CLIENTS: [&str; 8] = [
    "Nordec OY",
    "Merko",
    "Fund Ehitus",
    "Harmet",
    "E-Piim",
    "Mapri",
    "Bonava",
    "YIT",
];

/// Project status choices.
pub const PROJECT_STATUSES: [&str; 4] = ["Active", "Planning", "Paused", "Done"];

pub fn default_state() -> PersistedState {
    PersistedState {
        tables: default_tables(),
        roles: default_roles(),
        permissions: default_permissions(),
        column_permissions: ColumnPermissionMatrix::new(),
    }
}

pub fn default_roles() -> Vec<Role> {
    let role = |id: &str, name: &str, color: &str, description: &str, is_system: bool| Role {
        id: id.to_string(),
        name: name.to_string(),
        color: color.to_string(),
        description: Some(description.to_string()),
        is_system,
    };
    vec![
        role("admin", "Administrator", "#ef4444", "Full access to the system", true),
        role("manager", "Project Manager", "#3b82f6", "Runs projects and teams", false),
        role("foreman", "Foreman", "#f59e0b", "Organizes work on site", false),
        role("worker", "Worker", "#10b981", "Carries out work orders", false),
        role("client", "Client", "#6366f1", "View-only access", false),
    ]
}

/// Only empty role entries; every non-admin role starts denied.
pub fn default_permissions() -> PermissionMatrix {
    ["admin", "manager", "client"]
        .iter()
        .map(|role| (role.to_string(), Default::default()))
        .collect()
}

pub fn default_tables() -> Vec<TableDefinition> {
    vec![
        companies_table(),
        projects_table(50),
        daily_logs_table(),
        documents_table(),
        users_table(),
    ]
}

fn row(id: &str, fields: &[(&str, CellValue)]) -> Row {
    Row {
        id: id.to_string(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn system_table(id: &str, name: &str, columns: Vec<ColumnDefinition>) -> TableDefinition {
    let mut table = TableDefinition::new(id, name);
    table.is_system = true;
    table.columns = columns;
    table
}

fn companies_table() -> TableDefinition {
    let mut table = system_table(
        "companies",
        "Companies",
        vec![
            ColumnDefinition::new("id", "ID", ColumnType::Text).with_width(80),
            ColumnDefinition::new("name", "Name", ColumnType::Text)
                .with_width(200)
                .with_validation(ColumnValidation::required()),
            ColumnDefinition::new("logo", "Logo", ColumnType::Image).with_width(80),
            ColumnDefinition::new("type", "Type", ColumnType::Select)
                .with_width(120)
                .with_options(["client", "supplier", "subcontractor"]),
            ColumnDefinition::new("reg_code", "Reg. Code", ColumnType::Text).with_width(100),
        ],
    );
    table.rows = vec![
        row("c1", &[("name", "Nordec OY".into()), ("type", "client".into()), ("reg_code", "FI123456".into())]),
        row("c2", &[("name", "Merko".into()), ("type", "client".into()), ("reg_code", "EE100200".into())]),
        row("c3", &[("name", "Fund Ehitus".into()), ("type", "client".into()), ("reg_code", "EE555666".into())]),
    ];
    table
}

/// The `projects` table with `count` deterministic rows.
pub fn projects_table(count: usize) -> TableDefinition {
    let mut id_column = ColumnDefinition::new("id", "Code", ColumnType::Text).with_width(100);
    id_column.style = ColumnStyle {
        bold: Some(true),
        ..Default::default()
    };
    let mut table = system_table(
        "projects",
        "Projects",
        vec![
            id_column,
            ColumnDefinition::new("name", "Project Name", ColumnType::Text)
                .with_width(250)
                .with_validation(ColumnValidation {
                    required: Some(true),
                    min_length: Some(3),
                    ..Default::default()
                }),
            ColumnDefinition::new("status", "Status", ColumnType::Status)
                .with_width(120)
                .with_options(PROJECT_STATUSES),
            ColumnDefinition::new("progress", "Progress", ColumnType::Progress).with_width(120),
            ColumnDefinition::new("start_date", "Start", ColumnType::Date).with_width(120),
            ColumnDefinition::new("end_date", "End", ColumnType::Date).with_width(120),
            ColumnDefinition::new("budget", "Budget (EUR)", ColumnType::Currency).with_width(120),
            ColumnDefinition::reference("client_id", "Client", "companies", "name").with_width(150),
            ColumnDefinition::reference("manager_id", "Manager", "users", "name").with_width(150),
        ],
    );
    table.rows = generate_project_rows(count);
    table
}

/// Deterministic project rows; row `i` is always the same.
pub fn generate_project_rows(count: usize) -> Vec<Row> {
    (0..count).map(generate_project_row).collect()
}

pub fn generate_project_row(i: usize) -> Row {
    let hours_used = (i * 13) % 2000;
    let hours_total = ((i * 17) % 5000) + 2000;
    let progress = ((hours_used as f64 / hours_total as f64) * 100.0).round() as i64;
    row(
        &format!("GEN-{}", i),
        &[
            (
                "name",
                format!("Project #{} - {} Extension", i, CLIENTS[i % CLIENTS.len()]).into(),
            ),
            ("client_id", "c1".into()),
            ("manager_id", "u1".into()),
            ("status", PROJECT_STATUSES[i % PROJECT_STATUSES.len()].into()),
            ("start_date", "2024-01-01".into()),
            ("end_date", "2025-12-31".into()),
            ("budget", CellValue::Int((((i * 23) % 500_000) + 10_000) as i64)),
            ("progress", CellValue::Int(progress)),
        ],
    )
}

fn daily_logs_table() -> TableDefinition {
    let mut table = system_table(
        "daily_logs",
        "Daily Logs",
        vec![
            ColumnDefinition::new("id", "ID", ColumnType::Text).with_width(80),
            ColumnDefinition::new("date", "Date", ColumnType::Date).with_width(120),
            ColumnDefinition::new("description", "Description", ColumnType::LongText).with_width(300),
            ColumnDefinition::new("weather", "Weather", ColumnType::Tags).with_width(150),
            ColumnDefinition::new("image", "Photos", ColumnType::Image).with_width(100),
            ColumnDefinition::new("ai_tags", "AI Tags", ColumnType::Tags).with_width(200),
            ColumnDefinition::new("ai_description", "AI Analysis", ColumnType::Text)
                .with_width(250)
                .hidden(),
        ],
    );
    let today = Utc::now().date_naive();
    table.rows = (0..5)
        .map(|i| {
            let date = today - Duration::days(i as i64 * 2);
            row(
                &format!("LOG-{}", 100 + i),
                &[
                    ("date", date.format("%Y-%m-%d").to_string().into()),
                    (
                        "description",
                        format!("Log entry #{}. Assembly work done in zone B.", i + 1).into(),
                    ),
                    ("weather", vec!["Sunny".to_string(), "Windy".to_string()].into()),
                    (
                        "image",
                        format!("https://images.example.com/site/{}.jpg", i).into(),
                    ),
                    (
                        "ai_tags",
                        vec!["construction".to_string(), "site".to_string()].into(),
                    ),
                    ("ai_description", "Overview of the construction site.".into()),
                ],
            )
        })
        .collect();
    table.views = vec![SavedView {
        id: "v_cal".to_string(),
        name: "Calendar".to_string(),
        view_mode: ViewMode::Calendar,
        filters: BTreeMap::new(),
        sort_config: None,
        hidden_column_keys: Vec::new(),
    }];
    table
}

fn documents_table() -> TableDefinition {
    let mut table = system_table(
        "documents",
        "Documents",
        vec![
            ColumnDefinition::new("id", "ID", ColumnType::Text).with_width(80),
            ColumnDefinition::new("name", "File Name", ColumnType::Text).with_width(200),
            ColumnDefinition::new("type", "Type", ColumnType::Select)
                .with_width(100)
                .with_options(["PDF", "Drawing", "Contract", "Image"]),
            ColumnDefinition::new("file_url", "File", ColumnType::File).with_width(120),
            ColumnDefinition::reference("project_id", "Project", "projects", "name").with_width(150),
            ColumnDefinition::new("ai_tags", "AI Tags", ColumnType::Tags).with_width(200),
            ColumnDefinition::new("ai_summary", "AI Summary", ColumnType::LongText).with_width(300),
        ],
    );
    table.rows = vec![
        row(
            "D1",
            &[
                ("name", "Building-permit.pdf".into()),
                ("type", "PDF".into()),
                ("project_id", "GEN-0".into()),
                ("ai_tags", vec!["permit".to_string(), "official".to_string()].into()),
                ("ai_summary", "Contains building permit number 12345.".into()),
            ],
        ),
        row(
            "D2",
            &[
                ("name", "Floor-plan.dwg".into()),
                ("type", "Drawing".into()),
                ("project_id", "GEN-1".into()),
                ("ai_tags", vec!["drawing".to_string(), "architecture".to_string()].into()),
                ("ai_summary", "Ground floor plan viewed from the north.".into()),
            ],
        ),
    ];
    table
}

fn users_table() -> TableDefinition {
    let mut table = system_table(
        "users",
        "System Users",
        vec![
            ColumnDefinition::new("name", "Name", ColumnType::Text).with_width(180),
            ColumnDefinition::new("email", "Email", ColumnType::Text).with_width(200),
            ColumnDefinition::new("role_id", "Role", ColumnType::Select).with_width(120),
            ColumnDefinition::new("status", "Status", ColumnType::Status).with_width(100),
            ColumnDefinition::new("avatar", "Avatar", ColumnType::Image).with_width(80),
        ],
    );
    let user = |id: &str, name: &str, email: &str, role: &str, avatar: &str| {
        row(
            id,
            &[
                ("name", name.into()),
                ("email", email.into()),
                ("role_id", role.into()),
                ("status", "active".into()),
                ("avatar", avatar.into()),
            ],
        )
    };
    table.rows = vec![
        user("u1", "Kristofer Nilp", "kristofer@example.com", "admin", "KN"),
        user("u2", "Elvis Juus", "elvis@example.com", "manager", "EJ"),
        user("u3", "Kuldar Kosina", "kuldar@example.com", "foreman", "KK"),
    ];
    table
}

/// Sample automation: announce finished projects.
pub fn default_automations() -> Vec<Automation> {
    vec![Automation {
        id: "auto_1".to_string(),
        name: "Notify when a project is done".to_string(),
        active: true,
        table_id: "projects".to_string(),
        trigger: AutomationTrigger::status_changed("status", Some("Done")),
        conditions: Vec::new(),
        actions: vec![AutomationAction::NotifyUser {
            message: "Project {{name}} is finished!".to_string(),
        }],
        run_count: 0,
        last_run: None,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_are_system_tables() {
        let tables = default_tables();
        let ids: Vec<&str> = tables.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["companies", "projects", "daily_logs", "documents", "users"]);
        assert!(tables.iter().all(|t| t.is_system));
    }

    #[test]
    fn test_rows_only_use_declared_keys() {
        for table in default_tables() {
            for row in &table.rows {
                for key in row.fields.keys() {
                    assert!(table.has_column(key), "{}.{} is not a column", table.id, key);
                }
            }
        }
    }

    #[test]
    fn test_references_resolve_to_existing_tables() {
        let tables = default_tables();
        for table in &tables {
            for column in &table.columns {
                if let Some(target) = &column.reference_table_id {
                    assert!(tables.iter().any(|t| &t.id == target));
                }
            }
        }
    }

    #[test]
    fn test_generated_rows_are_deterministic() {
        assert_eq!(generate_project_row(42), generate_project_row(42));
        assert_eq!(generate_project_rows(3).len(), 3);
        assert_eq!(generate_project_row(7).id, "GEN-7");
    }

    #[test]
    fn test_admin_role_is_system() {
        let roles = default_roles();
        assert!(roles.iter().any(|r| r.id == "admin" && r.is_system));
        assert_eq!(roles.iter().filter(|r| r.is_system).count(), 1);
    }
}
