// src/seed.rs
use chrono::{Duration, NaiveDateTime};
use rust_decimal_macros::dec;
use tracing::info;

use crate::clock::Clock;
use crate::codes::{code_set, insert_code, CodeInput};
use crate::config::Config;
use crate::employee::{insert_employee, insert_role, EmployeeInput, RoleInput};
use crate::error::ServiceResult;
use crate::kpi::{kpi_code, KpiMaster};
use crate::organization::{insert_organization, OrganizationInput};
use crate::project::{insert_member, insert_project, MemberInput, ProjectInput};
use crate::session::Role;
use crate::store::{Store, Tables};
use crate::task::{insert_task, TaskInput};
use crate::users::{insert_user, UserInput};

// (set, code, name, description, sort)
const DEFAULT_CODES: &[(&str, &str, &str, &str, i32)] = &[
    (code_set::PROJECT_SIZE, "S", "小型", "預算<500萬", 1),
    (code_set::PROJECT_SIZE, "M", "中型", "預算500-2000萬", 2),
    (code_set::PROJECT_SIZE, "L", "大型", "預算2000-5000萬", 3),
    (code_set::PROJECT_SIZE, "XL", "超大型", "預算>5000萬", 4),
    (code_set::PROJECT_CRITICALITY, "一般", "一般", "影響範圍小", 1),
    (code_set::PROJECT_CRITICALITY, "重要", "重要", "影響部門運作", 2),
    (code_set::PROJECT_CRITICALITY, "重大", "重大", "影響公司營運", 3),
    (code_set::PROJECT_CRITICALITY, "關鍵", "關鍵", "影響公司存續", 4),
    (code_set::PROJECT_STATUS, "規劃中", "規劃中", "專案規劃階段", 1),
    (code_set::PROJECT_STATUS, "執行中", "執行中", "專案執行階段", 2),
    (code_set::PROJECT_STATUS, "暫停", "暫停", "專案暫停", 3),
    (code_set::PROJECT_STATUS, "結案", "結案", "專案已結案", 4),
    (code_set::PROJECT_STATUS, "取消", "取消", "專案已取消", 5),
    (code_set::PROJECT_TYPE, "開發", "開發", "系統開發專案", 1),
    (code_set::PROJECT_TYPE, "維運", "維運", "系統維運專案", 2),
    (code_set::PROJECT_TYPE, "研究", "研究", "技術研究專案", 3),
    (code_set::PROJECT_TYPE, "教育訓練", "教育訓練", "教育訓練專案", 4),
    (code_set::PORTFOLIO, "FIN", "財務組合", "財務相關專案", 1),
    (code_set::PORTFOLIO, "HR", "人資組合", "人資相關專案", 2),
    (code_set::PORTFOLIO, "OPS", "營運組合", "營運相關專案", 3),
    (code_set::TASK_GROUP, "kickoff", "專案啟動", "專案啟動會議", 1),
    (code_set::TASK_GROUP, "需求訪談", "需求訪談", "使用者需求收集", 2),
    (code_set::TASK_GROUP, "資源申請", "資源申請", "人力與設備申請", 3),
    (code_set::TASK_GROUP, "系統分析", "系統分析", "系統分析與設計", 4),
    (code_set::TASK_GROUP, "UT", "單元測試", "單元測試", 5),
    (code_set::TASK_GROUP, "SIT/UAT(教育訓練)", "整合測試", "整合測試與使用者驗收", 6),
    (code_set::TASK_GROUP, "上線驗收", "上線驗收", "系統上線與驗收", 7),
    (code_set::DEPEND_TYPE, "FS", "Finish-to-Start", "完成後開始", 1),
    (code_set::DEPEND_TYPE, "SS", "Start-to-Start", "同時開始", 2),
    (code_set::DEPEND_TYPE, "FF", "Finish-to-Finish", "同時完成", 3),
    (code_set::DEPEND_TYPE, "SF", "Start-to-Finish", "開始後完成", 4),
];

// (id, name, parent)
const DEFAULT_ORGS: &[(&str, &str, Option<&str>)] = &[
    ("HQ", "總公司", None),
    ("RD", "研發處", Some("HQ")),
    ("PMO", "專案管理辦公室", Some("HQ")),
    ("HR", "人資行政", Some("HQ")),
    ("RD-FE", "前端組", Some("RD")),
    ("RD-BE", "後端組", Some("RD")),
];

// (number, name, email, org, title, manager, primary role)
const DEFAULT_EMPLOYEES: &[(&str, &str, &str, &str, &str, Option<i64>, &str)] = &[
    ("EMP-001", "王小明", "ming.wang@example.com", "PMO", "專案經理", None, "專案經理"),
    ("EMP-002", "林美美", "mei.lin@example.com", "RD-FE", "資深工程師", Some(1001), "前端工程師"),
    ("EMP-003", "陳大華", "david.chen@example.com", "RD-BE", "系統分析師", Some(1001), "系統分析師"),
    ("EMP-004", "劉文強", "wen.liu@example.com", "HR", "人資主管", None, "人資主管"),
];

// (email, display name, password)
const DEFAULT_ADMIN: (&str, &str, &str) = ("admin@example.com", "系統管理員", "admin123");

// (code, name, description)
const DEFAULT_KPI_MASTERS: &[(&str, &str, &str)] = &[
    (kpi_code::SPI, "Schedule Performance Index", "進度績效指標"),
    (kpi_code::CPI, "Cost Performance Index", "成本績效指標"),
    (kpi_code::HEALTH, "Project Health", "專案健康度"),
    (kpi_code::CONTRIBUTION, "Contribution", "專案貢獻度"),
    (kpi_code::OUTPUT_PER_HOUR, "Output Per Hour", "工時效率"),
    (kpi_code::COLLABORATION, "Collaboration", "跨專案協作"),
];

fn seed_reference_tables(t: &mut Tables, now: NaiveDateTime) -> ServiceResult<()> {
    for (set, code, name, description, sort_order) in DEFAULT_CODES {
        insert_code(
            t,
            set,
            CodeInput {
                code: code.to_string(),
                code_name: name.to_string(),
                description: Some(description.to_string()),
                sort_order: *sort_order,
            },
        )?;
    }

    for (index, (code, name, description)) in DEFAULT_KPI_MASTERS.iter().enumerate() {
        let id = index as i64 + 1;
        t.kpi_masters.insert(
            id,
            KpiMaster {
                id,
                kpi_code: code.to_string(),
                kpi_name: name.to_string(),
                formula: None,
                description: Some(description.to_string()),
                created_at: now,
            },
        );
    }

    insert_user(
        t,
        UserInput {
            email: DEFAULT_ADMIN.0.to_string(),
            display_name: DEFAULT_ADMIN.1.to_string(),
            role: Role::Admin,
            employee_id: None,
            password: Some(DEFAULT_ADMIN.2.to_string()),
        },
    )?;
    Ok(())
}

fn seed_directory_tables(t: &mut Tables, now: NaiveDateTime) -> ServiceResult<()> {
    for (org_id, org_name, parent) in DEFAULT_ORGS {
        insert_organization(
            t,
            OrganizationInput {
                org_id: org_id.to_string(),
                org_name: org_name.to_string(),
                parent_org_id: parent.map(String::from),
                ..Default::default()
            },
            now,
        )?;
    }

    for (number, name, email, org_id, title, manager_id, role) in DEFAULT_EMPLOYEES {
        let employee = insert_employee(
            t,
            EmployeeInput {
                employee_no: number.to_string(),
                name: name.to_string(),
                email: Some(email.to_string()),
                title: title.to_string(),
                org_id: org_id.to_string(),
                manager_id: *manager_id,
                status: None,
            },
            now,
        )?;
        insert_role(
            t,
            employee.id,
            RoleInput {
                role_name: role.to_string(),
                role_code: None,
                is_primary: true,
            },
            now,
        )?;
    }

    Ok(())
}

/// Code sets, KPI masters and the built-in admin account. Every fresh store needs these.
pub fn seed_reference_data(store: &Store, clock: &Clock) -> ServiceResult<()> {
    let now = clock.now();
    store.write(|t| -> ServiceResult<()> { seed_reference_tables(t, now) })?;
    info!(
        "Seeded {} codes, {} KPI masters and the {} account",
        DEFAULT_CODES.len(),
        DEFAULT_KPI_MASTERS.len(),
        DEFAULT_ADMIN.0
    );
    Ok(())
}

/// Reference data plus the sample org tree and four employees.
pub fn seed_directory_data(store: &Store, clock: &Clock) -> ServiceResult<()> {
    let now = clock.now();
    store.write(|t| -> ServiceResult<()> {
        seed_reference_tables(t, now)?;
        seed_directory_tables(t, now)
    })?;
    info!(
        "Seeded reference data, {} organizations and {} employees",
        DEFAULT_ORGS.len(),
        DEFAULT_EMPLOYEES.len()
    );
    Ok(())
}

/// Seeds an empty store: reference data always, the demo data set only when enabled.
/// Returns false when the store already held data.
pub fn seed_empty_store(store: &Store, clock: &Clock, config: &Config) -> ServiceResult<bool> {
    if !store.is_empty()? {
        return Ok(false);
    }
    if config.seed_demo_data {
        seed_demo_data(store, clock)?;
    } else {
        seed_reference_data(store, clock)?;
    }
    Ok(true)
}

/// Directory data plus two projects with members and tasks and three more login accounts.
pub fn seed_demo_data(store: &Store, clock: &Clock) -> ServiceResult<()> {
    let now = clock.now();
    let today = clock.today();
    store.write(|t| -> ServiceResult<()> {
        seed_reference_tables(t, now)?;
        seed_directory_tables(t, now)?;

        let first = t.employees.keys().next().copied();
        let second = t.employees.keys().nth(1).copied();
        let third = t.employees.keys().nth(2).copied();

        insert_project(
            t,
            ProjectInput {
                code: "PRJ-001".to_string(),
                name: "ERP 升級專案".to_string(),
                project_type: "開發".to_string(),
                project_size: "L".to_string(),
                project_criticality: "重大".to_string(),
                portfolio: Some("FIN".to_string()),
                pm_id: first,
                start_date: Some(today - Duration::days(30)),
                end_date: Some(today + Duration::days(90)),
                budget_hours: dec!(1200),
                budget_cost: dec!(240000),
                status: "執行中".to_string(),
                description: Some("Upgrade the ERP platform".to_string()),
            },
        )?;
        insert_project(
            t,
            ProjectInput {
                code: "PRJ-002".to_string(),
                name: "人資流程優化".to_string(),
                project_type: "維運".to_string(),
                project_size: "M".to_string(),
                project_criticality: "重要".to_string(),
                portfolio: Some("HR".to_string()),
                pm_id: first,
                start_date: Some(today - Duration::days(10)),
                end_date: Some(today + Duration::days(60)),
                budget_hours: dec!(800),
                budget_cost: dec!(120000),
                status: "規劃中".to_string(),
                description: Some("Streamline HR workflows".to_string()),
            },
        )?;

        for (employee_id, role) in [(second, "PG"), (third, "SA")] {
            if let Some(employee_id) = employee_id {
                insert_member(
                    t,
                    "PRJ-001",
                    MemberInput {
                        employee_id,
                        role: role.to_string(),
                        allocation_pct: dec!(50),
                        start_date: None,
                        end_date: None,
                        is_active: None,
                    },
                )?;
            }
        }

        for (name, group) in [("專案啟動會議", "kickoff"), ("需求訪談", "需求訪談")] {
            insert_task(
                t,
                "PRJ-001",
                TaskInput {
                    task_name: name.to_string(),
                    task_group: Some(group.to_string()),
                    responsible_id: first,
                    plan_start: Some(today - Duration::days(30)),
                    plan_end: Some(today + Duration::days(10)),
                },
            )?;
        }

        if let Some(admin) = t.users.values_mut().find(|u| u.email == DEFAULT_ADMIN.0) {
            admin.employee_id = first;
        }
        for (name, email, role, password, employee_id) in [
            ("審核主管", "manager@example.com", Role::Manager, "manager123", first),
            ("專案經理", "pm@example.com", Role::Pm, "pm12345", first),
            ("一般員工", "staff@example.com", Role::Employee, "staff123", second),
        ] {
            insert_user(
                t,
                UserInput {
                    email: email.to_string(),
                    display_name: name.to_string(),
                    role,
                    employee_id,
                    password: Some(password.to_string()),
                },
            )?;
        }
        Ok(())
    })?;
    info!("Seeded demo projects, members, tasks and login accounts");
    Ok(())
}
