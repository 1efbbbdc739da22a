#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::models::{SubjectInput, clean_skills, photo_reference};
    use crate::records::{
        create_record, delete_record, get_record, list_records, map_write_error, update_record,
    };
    use crate::test::test_utils::{TestDbBuilder, subject};

    const NATIONAL_ID: &str = "LOPA900412HDFRRN09";
    const OTHER_NATIONAL_ID: &str = "GARM850101MDFRRS02";

    async fn skill_names(pool: &sqlx::SqlitePool) -> Vec<String> {
        sqlx::query_scalar::<_, String>("SELECT name FROM skills ORDER BY name")
            .fetch_all(pool)
            .await
            .expect("Failed to list skills")
    }

    #[test]
    fn test_validation_reports_first_violation() {
        let mut input = subject("SHORT");
        input.name = String::new();
        match input.validate() {
            Err(AppError::Validation(message)) => {
                assert_eq!(message, "national_id must be exactly 18 characters")
            }
            other => panic!("Expected validation error, got {:?}", other),
        }

        let input = SubjectInput::default();
        match input.validate() {
            Err(AppError::Validation(message)) => assert_eq!(message, "national_id is required"),
            other => panic!("Expected validation error, got {:?}", other),
        }

        let mut input = subject(NATIONAL_ID);
        input.longitude = None;
        assert!(matches!(input.validate(), Err(AppError::Validation(_))));

        let mut input = subject(NATIONAL_ID);
        input.latitude = Some(91.0);
        assert!(matches!(input.validate(), Err(AppError::Validation(_))));

        let mut input = subject(NATIONAL_ID);
        input.latitude = None;
        input.longitude = None;
        let valid = input.validate().expect("Coordinates are optional as a pair");
        assert_eq!(valid.coordinates, None);
    }

    #[test]
    fn test_skill_cleaning_and_photo_reference() {
        let skills = vec![
            " cooking ".to_string(),
            String::new(),
            "welding".to_string(),
            "cooking".to_string(),
        ];
        assert_eq!(clean_skills(&skills), vec!["cooking", "welding"]);

        assert_eq!(
            photo_reference("http://localhost:8000/uploads/abc.jpg"),
            Some("abc.jpg".to_string())
        );
        assert_eq!(photo_reference("abc.jpg"), Some("abc.jpg".to_string()));
        assert_eq!(photo_reference("http://localhost:8000/uploads/"), None);
    }

    #[rocket::async_test]
    async fn test_create_rejects_short_national_id_without_writing() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");

        let err = create_record(&test_db.pool, &subject("ABC123"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(test_db.count("subject_records").await, 0);
        assert_eq!(test_db.count("skills").await, 0);
    }

    #[rocket::async_test]
    async fn test_create_and_read_back() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();

        let mut input = subject(NATIONAL_ID);
        input.photo_url = Some("http://localhost:8000/uploads/ana.jpg".to_string());
        input.skills = vec!["welding".to_string(), "cooking".to_string()];

        let id = create_record(&test_db.pool, &input)
            .await
            .expect("Failed to create record");

        let record = get_record(&test_db.pool, &photos, id)
            .await
            .expect("Failed to read record");
        assert_eq!(record.national_id, NATIONAL_ID);
        assert_eq!(record.education_level, "Bachelor");
        assert_eq!(record.skills, vec!["cooking", "welding"]);
        assert_eq!(
            record.photo_url.as_deref(),
            Some("http://localhost:8000/uploads/ana.jpg")
        );
        assert_eq!(record.latitude, Some(19.43));

        let missing = get_record(&test_db.pool, &photos, id + 100).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[rocket::async_test]
    async fn test_duplicate_national_id_conflicts() {
        let test_db = TestDbBuilder::new()
            .record(subject(NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");

        let err = create_record(&test_db.pool, &subject(NATIONAL_ID))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(test_db.count("subject_records").await, 1);
    }

    #[rocket::async_test]
    async fn test_update_to_existing_national_id_conflicts() {
        let test_db = TestDbBuilder::new()
            .record(subject(NATIONAL_ID))
            .record(subject(OTHER_NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let other_id = test_db.record_id(OTHER_NATIONAL_ID).unwrap();

        let err = update_record(&test_db.pool, &photos, other_id, &subject(NATIONAL_ID))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Keeping its own national id is not a conflict.
        update_record(&test_db.pool, &photos, other_id, &subject(OTHER_NATIONAL_ID))
            .await
            .expect("Updating in place should succeed");
    }

    #[rocket::async_test]
    async fn test_unknown_education_level_is_invalid_reference() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");

        let mut input = subject(NATIONAL_ID);
        input.education_level = Some("Kindergarten".to_string());

        match create_record(&test_db.pool, &input).await {
            Err(AppError::InvalidReference { field, value, valid }) => {
                assert_eq!(field, "education_level");
                assert_eq!(value, "Kindergarten");
                assert!(valid.contains(&"Bachelor".to_string()));
            }
            other => panic!("Expected invalid reference, got {:?}", other),
        }
        assert_eq!(test_db.count("subject_records").await, 0);
    }

    #[rocket::async_test]
    async fn test_update_replaces_skill_links_but_keeps_skills() {
        let test_db = TestDbBuilder::new()
            .record(subject(NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let id = test_db.record_id(NATIONAL_ID).unwrap();

        let mut input = subject(NATIONAL_ID);
        input.skills = vec!["welding".to_string()];
        input.address = "48 Mill Lane".to_string();
        update_record(&test_db.pool, &photos, id, &input)
            .await
            .expect("Failed to update record");

        let record = get_record(&test_db.pool, &photos, id).await.unwrap();
        assert_eq!(record.skills, vec!["welding"]);
        assert_eq!(record.address, "48 Mill Lane");
        assert_eq!(skill_names(&test_db.pool).await, vec!["cooking", "welding"]);
    }

    #[rocket::async_test]
    async fn test_update_missing_record_is_not_found() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();

        let err = update_record(&test_db.pool, &photos, 999, &subject(NATIONAL_ID))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[rocket::async_test]
    async fn test_failure_while_linking_skills_rolls_back_everything() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");

        sqlx::query(
            "CREATE TRIGGER reject_skill BEFORE INSERT ON skills
             WHEN NEW.name = 'explode'
             BEGIN SELECT RAISE(ABORT, 'skill rejected'); END;",
        )
        .execute(&test_db.pool)
        .await
        .unwrap();

        let mut input = subject(NATIONAL_ID);
        input.skills = vec!["cooking".to_string(), "explode".to_string()];

        let err = create_record(&test_db.pool, &input).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        assert_eq!(test_db.count("subject_records").await, 0);
        assert_eq!(test_db.count("subject_skills").await, 0);
        assert_eq!(test_db.count("skills").await, 0);
    }

    #[rocket::async_test]
    async fn test_failed_update_keeps_previous_state() {
        let test_db = TestDbBuilder::new()
            .record(subject(NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let id = test_db.record_id(NATIONAL_ID).unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_skill BEFORE INSERT ON skills
             WHEN NEW.name = 'explode'
             BEGIN SELECT RAISE(ABORT, 'skill rejected'); END;",
        )
        .execute(&test_db.pool)
        .await
        .unwrap();

        let mut input = subject(NATIONAL_ID);
        input.name = "Changed".to_string();
        input.skills = vec!["explode".to_string()];

        assert!(update_record(&test_db.pool, &photos, id, &input).await.is_err());

        let record = get_record(&test_db.pool, &photos, id).await.unwrap();
        assert_eq!(record.name, "Ana");
        assert_eq!(record.skills, vec!["cooking", "welding"]);
    }

    #[rocket::async_test]
    async fn test_delete_removes_links_and_photo() {
        let mut input = subject(NATIONAL_ID);
        input.photo_url = Some("portrait.jpg".to_string());

        let test_db = TestDbBuilder::new()
            .record(input)
            .record(subject(OTHER_NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let id = test_db.record_id(NATIONAL_ID).unwrap();

        let photo_path = test_db.photos_dir.join("portrait.jpg");
        std::fs::write(&photo_path, b"jpeg").unwrap();

        delete_record(&test_db.pool, &photos, id)
            .await
            .expect("Failed to delete record");

        assert!(!photo_path.exists());
        assert_eq!(test_db.count("subject_records").await, 1);
        assert_eq!(test_db.count("subject_skills").await, 2);
        assert_eq!(skill_names(&test_db.pool).await, vec!["cooking", "welding"]);

        let again = delete_record(&test_db.pool, &photos, id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[rocket::async_test]
    async fn test_replaced_photo_is_removed_after_update() {
        let mut input = subject(NATIONAL_ID);
        input.photo_url = Some("old.jpg".to_string());

        let test_db = TestDbBuilder::new()
            .record(input.clone())
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let id = test_db.record_id(NATIONAL_ID).unwrap();

        let old_path = test_db.photos_dir.join("old.jpg");
        std::fs::write(&old_path, b"jpeg").unwrap();

        // Same photo: nothing is removed.
        update_record(&test_db.pool, &photos, id, &input).await.unwrap();
        assert!(old_path.exists());

        input.photo_url = Some("new.jpg".to_string());
        update_record(&test_db.pool, &photos, id, &input).await.unwrap();
        assert!(!old_path.exists());
    }

    #[rocket::async_test]
    async fn test_list_orders_newest_first() {
        let test_db = TestDbBuilder::new()
            .record(subject(NATIONAL_ID))
            .record(subject(OTHER_NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");

        let records = list_records(&test_db.pool, &test_db.photo_store())
            .await
            .expect("Failed to list records");

        let ids: Vec<&str> = records.iter().map(|r| r.national_id.as_str()).collect();
        assert_eq!(ids, vec![OTHER_NATIONAL_ID, NATIONAL_ID]);
        assert!(records.iter().all(|r| r.skills == vec!["cooking", "welding"]));
    }

    #[rocket::async_test]
    async fn test_delete_keeps_photo_shared_with_another_record() {
        let mut first = subject(NATIONAL_ID);
        first.photo_url = Some("http://cdn-a.example.com/uploads/shared.jpg".to_string());
        let mut second = subject(OTHER_NATIONAL_ID);
        second.photo_url = Some("http://cdn-b.example.com/photos/shared.jpg".to_string());

        let test_db = TestDbBuilder::new()
            .record(first)
            .record(second)
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let first_id = test_db.record_id(NATIONAL_ID).unwrap();
        let second_id = test_db.record_id(OTHER_NATIONAL_ID).unwrap();

        let shared_path = test_db.photos_dir.join("shared.jpg");
        std::fs::write(&shared_path, b"jpeg").unwrap();

        delete_record(&test_db.pool, &photos, first_id)
            .await
            .expect("Failed to delete record");
        assert!(shared_path.exists(), "Photo still referenced by another record was removed");

        let survivor = get_record(&test_db.pool, &photos, second_id).await.unwrap();
        assert_eq!(
            survivor.photo_url.as_deref(),
            Some("http://localhost:8000/uploads/shared.jpg")
        );

        // Last reference gone: now the file goes too.
        delete_record(&test_db.pool, &photos, second_id)
            .await
            .expect("Failed to delete record");
        assert!(!shared_path.exists());
    }

    #[rocket::async_test]
    async fn test_update_keeps_photo_shared_with_another_record() {
        let mut first = subject(NATIONAL_ID);
        first.photo_url = Some("shared.jpg".to_string());
        let mut second = subject(OTHER_NATIONAL_ID);
        second.photo_url = Some("shared.jpg".to_string());

        let test_db = TestDbBuilder::new()
            .record(first.clone())
            .record(second)
            .build()
            .await
            .expect("Failed to build test database");
        let photos = test_db.photo_store();
        let first_id = test_db.record_id(NATIONAL_ID).unwrap();

        let shared_path = test_db.photos_dir.join("shared.jpg");
        std::fs::write(&shared_path, b"jpeg").unwrap();

        first.photo_url = Some("replacement.jpg".to_string());
        update_record(&test_db.pool, &photos, first_id, &first)
            .await
            .expect("Failed to update record");

        assert!(shared_path.exists());
    }

    #[rocket::async_test]
    async fn test_unique_constraint_violation_maps_to_conflict() {
        let test_db = TestDbBuilder::new()
            .record(subject(NATIONAL_ID))
            .build()
            .await
            .expect("Failed to build test database");

        // Skips the pre-check, as a concurrent writer racing past it would.
        let err = sqlx::query(
            "INSERT INTO subject_records
             (national_id, name, surname, address, birthdate, education_level_id)
             SELECT ?, 'Raced', 'Writer', 'Elsewhere', '1991-01-01', id
             FROM education_levels WHERE name = 'Bachelor'",
        )
        .bind(NATIONAL_ID)
        .execute(&test_db.pool)
        .await
        .unwrap_err();

        assert!(matches!(map_write_error(err), AppError::Conflict(_)));

        let other = sqlx::query("INSERT INTO subject_records (national_id) VALUES ('short')")
            .execute(&test_db.pool)
            .await
            .unwrap_err();
        assert!(matches!(map_write_error(other), AppError::Database(_)));

        assert_eq!(test_db.count("subject_records").await, 1);
    }

    #[test]
    fn test_photo_urls_use_public_base() {
        let photos = crate::photos::PhotoStore::new("/tmp/uploads", "https://registry.example.com/");
        assert_eq!(
            photos.url_for("ana.jpg"),
            "https://registry.example.com/uploads/ana.jpg"
        );
    }
}
