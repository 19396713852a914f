// src/access.rs - Role and page access table
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

// ======== ROLE ========

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr, EnumIter,
)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    Admin,
    Supervisor,
    Employee,
}

impl Role {
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Administrator",
            Role::Supervisor => "Supervisor",
            Role::Employee => "Employee",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Full access including employees, activity log and settings",
            Role::Supervisor => "Runs the shop: finances and reports, may delete records",
            Role::Employee => "Day-to-day work on inventory, orders and books",
        }
    }
}

// ======== PAGES ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Page {
    Dashboard,
    Inventory,
    Movements,
    Orders,
    Books,
    Sales,
    Expenses,
    Reports,
    Employees,
    ActivityLog,
    Settings,
}

/// Roles allowed on each page, listed explicitly per role: there is no
/// hierarchy, so a page closed to supervisors is not implied closed to
/// employees and vice versa.
///
/// Columns: admin, supervisor, employee.
static PAGE_ACCESS: &[(Page, [bool; 3])] = &[
    (Page::Dashboard, [true, true, true]),
    (Page::Inventory, [true, true, true]),
    (Page::Movements, [true, true, true]),
    (Page::Orders, [true, true, true]),
    (Page::Books, [true, true, true]),
    (Page::Sales, [true, true, false]),
    (Page::Expenses, [true, true, false]),
    (Page::Reports, [true, true, false]),
    (Page::Employees, [true, false, false]),
    (Page::ActivityLog, [true, false, false]),
    (Page::Settings, [true, false, false]),
];

fn column(role: Role) -> usize {
    match role {
        Role::Admin => 0,
        Role::Supervisor => 1,
        Role::Employee => 2,
    }
}

pub fn can_access_page(role: Role, page: Page) -> bool {
    PAGE_ACCESS
        .iter()
        .find(|(p, _)| *p == page)
        .map(|(_, allowed)| allowed[column(role)])
        // pages without an entry are open to everyone
        .unwrap_or(true)
}

/// Same as [`can_access_page`] for a raw page identifier coming from a
/// client. Unknown identifiers are allowed.
pub fn can_access_page_id(role: Role, page_id: &str) -> bool {
    match Page::from_str(page_id) {
        Ok(page) => can_access_page(role, page),
        Err(_) => true,
    }
}

pub fn can_delete(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Supervisor)
}

pub fn can_manage_employees(role: Role) -> bool {
    matches!(role, Role::Admin)
}

pub fn allowed_pages(role: Role) -> Vec<Page> {
    Page::iter().filter(|page| can_access_page(role, *page)).collect()
}
