#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::auth::{
        AccessContext, AccessGate, EffectivePermissions, Permission, Principal, Role,
        effective_permissions, resolve,
    };
    use crate::db::{get_principal, replace_overrides};
    use crate::error::AppError;
    use crate::test::test_utils::TestDbBuilder;

    fn context(role: Role, overrides: &[Permission]) -> AccessContext {
        AccessContext {
            principal: Principal {
                id: 7,
                name: "Operator".to_string(),
                email: "operator@example.com".to_string(),
                role,
            },
            permissions: resolve(role, overrides.iter().copied()),
        }
    }

    #[test]
    fn test_administrator_resolves_to_every_permission() {
        let effective = resolve(Role::Administrator, Vec::<Permission>::new());
        assert_eq!(effective, EffectivePermissions::All);
        for permission in Permission::ALL {
            assert!(effective.contains(permission));
        }

        // Overrides never narrow an administrator.
        let effective = resolve(Role::Administrator, [Permission::RecordCreate]);
        assert_eq!(effective.permissions(), Permission::ALL.to_vec());
    }

    #[test]
    fn test_standard_resolves_to_baseline_plus_overrides() {
        assert!(Role::Standard.baseline().is_empty());

        let effective = resolve(Role::Standard, Vec::<Permission>::new());
        assert_eq!(effective, EffectivePermissions::Granted(BTreeSet::new()));

        let effective = resolve(
            Role::Standard,
            [Permission::RecordEdit, Permission::RecordEdit],
        );
        assert!(effective.contains(Permission::RecordEdit));
        assert!(!effective.contains(Permission::RecordCreate));
        assert!(!effective.contains(Permission::RecordDelete));
        assert_eq!(effective.names(), vec!["record.edit".to_string()]);
    }

    #[test]
    fn test_permission_and_role_names() {
        assert_eq!(
            "record.delete".parse::<Permission>().unwrap(),
            Permission::RecordDelete
        );
        assert_eq!("standard".parse::<Role>().unwrap(), Role::Standard);

        match "record.archive".parse::<Permission>() {
            Err(AppError::InvalidReference { field, valid, .. }) => {
                assert_eq!(field, "permission");
                assert_eq!(valid, Permission::catalog_names());
            }
            other => panic!("Expected invalid reference, got {:?}", other),
        }

        assert!(matches!(
            "superuser".parse::<Role>(),
            Err(AppError::InvalidReference { field: "role", .. })
        ));
    }

    #[test]
    fn test_gate_rejects_missing_context() {
        let gate = AccessGate::require_permission(Permission::RecordCreate);
        assert!(matches!(
            gate.check(None),
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_gate_permission_checks() {
        let gate = AccessGate::require_permission(Permission::RecordDelete);

        assert!(gate.check(Some(&context(Role::Administrator, &[]))).is_ok());
        assert!(
            gate.check(Some(&context(Role::Standard, &[Permission::RecordDelete])))
                .is_ok()
        );

        match gate.check(Some(&context(Role::Standard, &[Permission::RecordCreate]))) {
            Err(AppError::Forbidden(denial)) => {
                assert_eq!(denial.required_permission.as_deref(), Some("record.delete"));
                assert_eq!(denial.current_permissions, vec!["record.create".to_string()]);
            }
            other => panic!("Expected forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_gate_role_checks() {
        let gate = AccessGate::require_role(Role::Administrator);

        assert!(gate.check(Some(&context(Role::Administrator, &[]))).is_ok());

        // Holding every permission does not make a standard principal an administrator.
        let err = gate
            .check(Some(&context(Role::Standard, &Permission::ALL)))
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(err.body()["required_permission"], serde_json::Value::Null);
    }

    #[test]
    fn test_admit_passes_guard_failures_through() {
        let gate = AccessGate::require_permission(Permission::RecordCreate);
        let err = gate
            .admit(Err(AppError::Unauthenticated("Credential has expired".to_string())))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));

        let ctx = gate
            .admit(Ok(context(Role::Standard, &[Permission::RecordCreate])))
            .expect("Principal holding the permission should be admitted");
        assert_eq!(ctx.principal.id, 7);
    }

    #[rocket::async_test]
    async fn test_override_changes_are_visible_on_next_resolution() {
        let test_db = TestDbBuilder::new()
            .administrator("Admin", "admin@example.com")
            .standard("Clerk", "clerk@example.com", &[])
            .build()
            .await
            .expect("Failed to build test database");

        let admin_id = test_db.principal_id("admin@example.com").unwrap();
        let clerk_id = test_db.principal_id("clerk@example.com").unwrap();
        let clerk = get_principal(&test_db.pool, clerk_id).await.unwrap();

        let before = effective_permissions(&test_db.pool, &clerk).await.unwrap();
        assert!(!before.contains(Permission::RecordEdit));

        replace_overrides(&test_db.pool, clerk_id, admin_id, &[Permission::RecordEdit])
            .await
            .expect("Failed to grant override");
        let granted = effective_permissions(&test_db.pool, &clerk).await.unwrap();
        assert!(granted.contains(Permission::RecordEdit));

        replace_overrides(&test_db.pool, clerk_id, admin_id, &[])
            .await
            .expect("Failed to revoke override");
        let revoked = effective_permissions(&test_db.pool, &clerk).await.unwrap();
        assert!(!revoked.contains(Permission::RecordEdit));
    }

    #[rocket::async_test]
    async fn test_unknown_override_rows_are_ignored() {
        let test_db = TestDbBuilder::new()
            .standard("Clerk", "clerk@example.com", &[Permission::RecordCreate])
            .build()
            .await
            .expect("Failed to build test database");

        let clerk_id = test_db.principal_id("clerk@example.com").unwrap();

        sqlx::query("INSERT INTO permissions (name, description) VALUES ('record.archive', '')")
            .execute(&test_db.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO principal_permissions (principal_id, permission_id)
             SELECT ?, id FROM permissions WHERE name = 'record.archive'",
        )
        .bind(clerk_id)
        .execute(&test_db.pool)
        .await
        .unwrap();

        let clerk = get_principal(&test_db.pool, clerk_id).await.unwrap();
        let effective = effective_permissions(&test_db.pool, &clerk).await.unwrap();
        assert_eq!(effective.names(), vec!["record.create".to_string()]);
    }
}
