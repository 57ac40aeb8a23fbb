// src/timesheet_tests.rs

#[cfg(test)]
mod tests {
    use crate::clock::Clock;
    use crate::error::{ServiceError, ValidationError};
    use crate::seed::seed_demo_data;
    use crate::session::Role;
    use crate::store::Store;
    use crate::timesheet::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const MANAGER: i64 = 1001; // also PM of both demo projects
    const STAFF: i64 = 1002; // PG on PRJ-001, reports to 1001
    const ANALYST: i64 = 1003; // SA on PRJ-001, reports to 1001
    const HR_LEAD: i64 = 1004; // no projects, no reports

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_else(|_| panic!("Invalid datetime string format: {}", s))
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", s))
    }

    // Wednesday 2025-04-16.
    fn setup_test_environment() -> (TimesheetService, Clock) {
        let clock = Clock::fixed(dt("2025-04-16 10:00:00"));
        let store = Store::in_memory();
        seed_demo_data(&store, &clock).unwrap();
        (TimesheetService::new(store, clock.clone()), clock)
    }

    fn entry(project: &str, task_id: Option<i64>, work_date: &str, hours: Decimal, overtime: Decimal) -> TimesheetInput {
        TimesheetInput {
            project_code: project.to_string(),
            task_id,
            work_date: date(work_date),
            hours,
            overtime_hours: overtime,
            notes: None,
        }
    }

    fn reviewer(employee_id: Option<i64>, role: Role) -> Reviewer {
        Reviewer { employee_id, role }
    }

    fn validation(err: ServiceError) -> ValidationError {
        match err {
            ServiceError::Validation(v) => v,
            other => panic!("Expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_create_forces_draft_and_canonical_project_code() {
        let (service, _) = setup_test_environment();
        let created = service
            .create(STAFF, entry("prj-001", None, "2025-04-15", dec!(8), dec!(0)))
            .unwrap();
        assert_eq!(created.status, TimesheetStatus::Draft);
        assert_eq!(created.project_code, "PRJ-001");
        assert!(created.submitted_at.is_none());
    }

    #[test]
    fn test_create_rejects_future_dates_and_zero_hours() {
        let (service, _) = setup_test_environment();
        let err = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-17", dec!(8), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::FutureWorkDate { .. }));

        let err = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-16", dec!(0), dec!(0)))
            .unwrap_err();
        assert_eq!(validation(err), ValidationError::ZeroHours);

        let err = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-16", dec!(25), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::OutOfRange { field: "hours", .. }));
    }

    #[test]
    fn test_create_requires_membership_and_matching_task() {
        let (service, _) = setup_test_environment();
        let err = service
            .create(HR_LEAD, entry("PRJ-001", None, "2025-04-15", dec!(4), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotProjectMember { .. }));

        // Demo tasks belong to PRJ-001; 1001 is a member of PRJ-002 as its PM.
        let err = service
            .create(MANAGER, entry("PRJ-002", Some(1), "2025-04-15", dec!(4), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::TaskNotInProject { .. }));

        let err = service
            .create(STAFF, entry("NOPE", None, "2025-04-15", dec!(4), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotFound { .. }));
    }

    #[test]
    fn test_daily_total_is_capped_at_twenty_four_hours() {
        let (service, _) = setup_test_environment();
        let first = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-14", dec!(10), dec!(4)))
            .unwrap();
        service
            .create(STAFF, entry("PRJ-001", Some(1), "2025-04-14", dec!(10), dec!(0)))
            .unwrap();

        let err = service
            .create(STAFF, entry("PRJ-001", Some(2), "2025-04-14", dec!(0.5), dec!(0)))
            .unwrap_err();
        match validation(err) {
            ValidationError::DailyLimitExceeded { total, .. } => assert_eq!(total, dec!(24.5)),
            other => panic!("Expected DailyLimitExceeded, got {:?}", other),
        }

        // Editing an entry does not count its own old hours.
        service
            .update(first.id, STAFF, entry("PRJ-001", None, "2025-04-14", dec!(12), dec!(2)))
            .unwrap();

        let total: Decimal = service
            .week(STAFF, date("2025-04-14"))
            .unwrap()
            .iter()
            .filter(|e| e.work_date == date("2025-04-14"))
            .map(|e| e.total_hours())
            .sum();
        assert!(total <= DAILY_HOUR_LIMIT);
    }

    #[test]
    fn test_duplicate_entry_key_is_rejected_case_insensitively() {
        let (service, _) = setup_test_environment();
        service
            .create(STAFF, entry("PRJ-001", Some(1), "2025-04-15", dec!(2), dec!(0)))
            .unwrap();
        let err = service
            .create(STAFF, entry("prj-001", Some(1), "2025-04-15", dec!(1), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::Duplicate { .. }));

        // Same project and date but a different task is a separate entry.
        assert!(service
            .create(STAFF, entry("PRJ-001", Some(2), "2025-04-15", dec!(1), dec!(0)))
            .is_ok());
    }

    #[test]
    fn test_full_review_cycle_with_reject_and_resubmit() {
        let (service, clock) = setup_test_environment();
        let manager = reviewer(Some(MANAGER), Role::Manager);
        let created = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-15", dec!(8), dec!(1)))
            .unwrap();

        service.submit(created.id, STAFF, Role::Employee).unwrap();
        let err = service
            .update(created.id, STAFF, entry("PRJ-001", None, "2025-04-15", dec!(7), dec!(0)))
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::InvalidTransition { .. }));

        let queue = service.review_queue(&manager, &ReviewFilter::default()).unwrap();
        assert_eq!(queue.iter().map(|e| e.id).collect::<Vec<_>>(), vec![created.id]);

        let err = service.reject(created.id, &manager, Some("  ".to_string())).unwrap_err();
        assert_eq!(validation(err), ValidationError::RemarksRequired);

        clock.advance(Duration::minutes(5));
        let rejected = service
            .reject(created.id, &manager, Some("Wrong project hours".to_string()))
            .unwrap();
        assert_eq!(rejected.status, TimesheetStatus::Rejected);
        assert_eq!(rejected.approved_by, Some(MANAGER));

        clock.advance(Duration::minutes(5));
        let edited = service
            .update(created.id, STAFF, entry("PRJ-001", None, "2025-04-15", dec!(7), dec!(0)))
            .unwrap();
        assert_eq!(edited.status, TimesheetStatus::Draft);

        clock.advance(Duration::minutes(5));
        service.submit(created.id, STAFF, Role::Employee).unwrap();
        clock.advance(Duration::minutes(5));
        let approved = service.approve(created.id, &manager, None).unwrap();
        assert_eq!(approved.status, TimesheetStatus::Approved);

        let actions: Vec<AuditAction> = service
            .audits(created.id)
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(
            actions,
            vec![AuditAction::Approve, AuditAction::Submit, AuditAction::Reject, AuditAction::Submit]
        );

        // Approved entries are frozen for the owner.
        assert!(service.delete(created.id, STAFF).is_err());
    }

    #[test]
    fn test_only_owner_may_edit_submit_or_delete() {
        let (service, _) = setup_test_environment();
        let created = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-15", dec!(8), dec!(0)))
            .unwrap();
        let err = service.submit(created.id, ANALYST, Role::Employee).unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotOwner { .. }));
        let err = service.delete(created.id, ANALYST).unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotOwner { .. }));

        service.delete(created.id, STAFF).unwrap();
        assert!(service.get(created.id).unwrap().is_none());
    }

    #[test]
    fn test_reviewer_scope_by_role() {
        let (service, _) = setup_test_environment();
        let staff_entry = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-15", dec!(8), dec!(0)))
            .unwrap();
        let own_entry = service
            .create(MANAGER, entry("PRJ-001", None, "2025-04-15", dec!(8), dec!(0)))
            .unwrap();
        service.submit(staff_entry.id, STAFF, Role::Employee).unwrap();
        service.submit(own_entry.id, MANAGER, Role::Manager).unwrap();

        let filter = ReviewFilter::default();
        let ids = |r: Reviewer| -> Vec<i64> {
            service
                .review_queue(&r, &filter)
                .unwrap()
                .into_iter()
                .map(|e| e.id)
                .collect()
        };

        // Nobody reviews their own entries, not even an Admin.
        assert_eq!(ids(reviewer(Some(MANAGER), Role::Manager)), vec![staff_entry.id]);
        assert_eq!(ids(reviewer(Some(MANAGER), Role::Pm)), vec![staff_entry.id]);
        assert_eq!(ids(reviewer(Some(MANAGER), Role::Admin)), vec![staff_entry.id]);
        assert_eq!(ids(reviewer(None, Role::Admin)).len(), 2);
        assert!(ids(reviewer(Some(HR_LEAD), Role::Manager)).is_empty());
        assert!(ids(reviewer(Some(ANALYST), Role::Employee)).is_empty());

        let err = service
            .approve(own_entry.id, &reviewer(Some(MANAGER), Role::Admin), None)
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotReviewer { .. }));
        assert!(service
            .approve(own_entry.id, &reviewer(None, Role::Admin), None)
            .is_ok());
    }

    #[test]
    fn test_review_queue_defaults_to_the_last_week() {
        let (service, _) = setup_test_environment();
        let old = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-01", dec!(8), dec!(0)))
            .unwrap();
        let recent = service
            .create(STAFF, entry("PRJ-001", None, "2025-04-10", dec!(8), dec!(0)))
            .unwrap();
        service.submit(old.id, STAFF, Role::Employee).unwrap();
        service.submit(recent.id, STAFF, Role::Employee).unwrap();
        let manager = reviewer(Some(MANAGER), Role::Manager);

        let queue = service.review_queue(&manager, &ReviewFilter::default()).unwrap();
        assert_eq!(queue.iter().map(|e| e.id).collect::<Vec<_>>(), vec![recent.id]);

        let wide = ReviewFilter {
            start_date: Some(date("2025-03-31")),
            employee_id: Some(STAFF),
            project_code: Some("prj-001".to_string()),
            ..Default::default()
        };
        let queue = service.review_queue(&manager, &wide).unwrap();
        assert_eq!(queue.iter().map(|e| e.id).collect::<Vec<_>>(), vec![recent.id, old.id]);
    }

    #[test]
    fn test_week_view_is_monday_based_and_ordered() {
        let (service, _) = setup_test_environment();
        service
            .create(STAFF, entry("PRJ-001", Some(2), "2025-04-15", dec!(2), dec!(0)))
            .unwrap();
        service
            .create(STAFF, entry("PRJ-001", Some(1), "2025-04-15", dec!(2), dec!(0)))
            .unwrap();
        service
            .create(STAFF, entry("PRJ-001", None, "2025-04-14", dec!(2), dec!(0)))
            .unwrap();
        service
            .create(STAFF, entry("PRJ-001", None, "2025-04-13", dec!(2), dec!(0)))
            .unwrap();

        assert_eq!(week_start(date("2025-04-16")), date("2025-04-14"));
        assert_eq!(week_start(date("2025-04-13")), date("2025-04-07"));

        let week: Vec<(NaiveDate, Option<i64>)> = service
            .week(STAFF, date("2025-04-16"))
            .unwrap()
            .into_iter()
            .map(|e| (e.work_date, e.task_id))
            .collect();
        assert_eq!(
            week,
            vec![
                (date("2025-04-14"), None),
                (date("2025-04-15"), Some(1)),
                (date("2025-04-15"), Some(2)),
            ]
        );
    }
}
