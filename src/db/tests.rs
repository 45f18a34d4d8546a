//! Database integration tests.

#[cfg(test)]
mod db_tests {
    use super::super::*;
    use crate::error::AppError;
    use crate::models::index::*;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).unwrap();
        (db, temp_dir)
    }

    fn request(name: &str) -> CreateFileRequest {
        CreateFileRequest {
            original_name: name.to_string(),
            mime_type: "image/png".to_string(),
            category: FileCategory::Image,
            size_bytes: 1024,
            conversation_id: Some("c1".to_string()),
            uploaded_by: Some("u1".to_string()),
            storage_path: format!("uploads/{}", name),
            public_url: None,
            tags: None,
            metadata: None,
            uploaded_at: None,
            expires_at: None,
        }
    }

    fn entry_for(
        db: &Database,
        kind: IndexKind,
        record: &FileRecord,
    ) -> Option<IndexEntry> {
        let partition = kind.partition_for(record)?;
        db.indexes
            .get_entry(kind, &partition, record.uploaded_at, &record.id)
            .unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_create_fans_out_to_all_four_indexes() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();

        for kind in IndexKind::ALL {
            let entry = entry_for(&db, kind, &record)
                .unwrap_or_else(|| panic!("missing {} entry", kind));
            assert_eq!(entry.file_id, record.id);
            assert!(entry.is_active);
        }
    }

    #[test]
    fn test_create_without_conversation_skips_that_index() {
        let (db, _temp) = setup_test_db();

        let mut req = request("a.png");
        req.conversation_id = None;
        let record = IndexOps::create_file(&db, req).unwrap();

        assert_eq!(db.indexes.tree(IndexKind::Conversation).len(), 0);
        assert!(entry_for(&db, IndexKind::Uploader, &record).is_some());
        assert!(entry_for(&db, IndexKind::Category, &record).is_some());
        assert!(entry_for(&db, IndexKind::UploadDate, &record).is_some());
    }

    #[test]
    fn test_create_rejects_missing_required_fields() {
        let (db, _temp) = setup_test_db();

        let mut req = request("a.png");
        req.mime_type = String::new();
        let err = IndexOps::create_file(&db, req).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(db.files.tree.len(), 0);
    }

    #[test]
    fn test_hard_delete_removes_record_and_all_pointers() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();
        IndexOps::hard_delete(&db, &record.id).unwrap();

        assert!(db.files.get(&record.id).unwrap().is_none());
        for kind in IndexKind::ALL {
            assert_eq!(db.indexes.tree(kind).len(), 0, "dangling {} entry", kind);
        }

        let err = IndexOps::hard_delete(&db, &record.id).unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn test_soft_delete_visibility() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();
        IndexOps::soft_delete(&db, &record.id).unwrap();

        let active = IndexOps::list_by_partition(
            &db,
            IndexKind::Conversation,
            "c1",
            &ListOptions::default(),
        )
        .unwrap();
        assert!(active.files.is_empty());

        let inactive_opts = ListOptions {
            active_only: false,
            ..Default::default()
        };
        let inactive =
            IndexOps::list_by_partition(&db, IndexKind::Conversation, "c1", &inactive_opts)
                .unwrap();
        assert_eq!(inactive.files.len(), 1);
        assert_eq!(inactive.files[0].id, record.id);
        assert!(inactive.files[0].deleted_at.is_some());

        // record retained, only flipped inactive
        let stored = db.files.get(&record.id).unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[test]
    fn test_update_category_rewrites_every_projection() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();
        let patch = UpdateFileRequest {
            category: Some(FileCategory::Video),
            ..Default::default()
        };
        let updated = IndexOps::update_indexed_fields(&db, &record.id, patch).unwrap();
        assert_eq!(updated.category, FileCategory::Video);

        for kind in IndexKind::ALL {
            let entry = entry_for(&db, kind, &updated).unwrap();
            assert_eq!(entry.category, FileCategory::Video, "{} projection", kind);
            assert!(entry.is_active);
        }

        // the by-category pointer moved partitions: nothing left under image
        assert!(db
            .indexes
            .get_entry(IndexKind::Category, "image", record.uploaded_at, &record.id)
            .unwrap()
            .is_none());
        assert_eq!(db.indexes.tree(IndexKind::Category).len(), 1);
    }

    #[test]
    fn test_update_nonindexed_fields_leaves_indexes_untouched() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();
        let before: Vec<_> = IndexKind::ALL
            .iter()
            .map(|kind| db.indexes.tree(*kind).iter().next().unwrap().unwrap())
            .collect();

        let patch = UpdateFileRequest {
            original_name: Some("b.png".to_string()),
            tags: Some(vec!["receipt".to_string()]),
            ..Default::default()
        };
        IndexOps::update_indexed_fields(&db, &record.id, patch).unwrap();

        let after: Vec<_> = IndexKind::ALL
            .iter()
            .map(|kind| db.indexes.tree(*kind).iter().next().unwrap().unwrap())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_update_skips_missing_index_entry() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();

        // simulate a create whose conversation pointer never landed
        let key = entry_key("c1", record.uploaded_at, &record.id);
        db.indexes
            .tree(IndexKind::Conversation)
            .remove(key)
            .unwrap();

        let patch = UpdateFileRequest {
            category: Some(FileCategory::Document),
            ..Default::default()
        };
        let updated = IndexOps::update_indexed_fields(&db, &record.id, patch).unwrap();

        assert!(entry_for(&db, IndexKind::Conversation, &updated).is_none());
        let entry = entry_for(&db, IndexKind::Category, &updated).unwrap();
        assert_eq!(entry.category, FileCategory::Document);
    }

    #[test]
    fn test_record_access_never_writes_indexes() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();
        let before: Vec<_> = IndexKind::ALL
            .iter()
            .map(|kind| db.indexes.tree(*kind).iter().next().unwrap().unwrap())
            .collect();

        let accessed = IndexOps::record_access(&db, &record.id).unwrap();
        assert_eq!(accessed.download_count, 1);
        assert!(accessed.last_accessed_at.is_some());

        let again = IndexOps::record_access(&db, &record.id).unwrap();
        assert_eq!(again.download_count, 2);

        let after: Vec<_> = IndexKind::ALL
            .iter()
            .map(|kind| db.indexes.tree(*kind).iter().next().unwrap().unwrap())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_list_orders_newest_first_and_paginates() {
        let (db, _temp) = setup_test_db();

        let mut ids = Vec::new();
        for day in 1..=3 {
            let mut req = request(&format!("f{}.png", day));
            req.uploaded_at = Some(at(2024, 1, day));
            ids.push(IndexOps::create_file(&db, req).unwrap().id);
        }

        let opts = ListOptions {
            limit: Some(2),
            ..Default::default()
        };
        let page1 =
            IndexOps::list_by_partition(&db, IndexKind::Conversation, "c1", &opts).unwrap();
        assert_eq!(page1.files.len(), 2);
        assert_eq!(page1.files[0].id, ids[2]);
        assert_eq!(page1.files[1].id, ids[1]);
        let cursor = page1.next_cursor.expect("full page carries a cursor");

        let opts = ListOptions {
            limit: Some(2),
            cursor: Some(cursor),
            ..Default::default()
        };
        let page2 =
            IndexOps::list_by_partition(&db, IndexKind::Conversation, "c1", &opts).unwrap();
        assert_eq!(page2.files.len(), 1);
        assert_eq!(page2.files[0].id, ids[0]);
        assert!(page2.next_cursor.is_none());
    }

    #[test]
    fn test_list_rejects_foreign_cursor() {
        let (db, _temp) = setup_test_db();

        let mut req = request("a.png");
        req.uploaded_at = Some(at(2024, 1, 1));
        let record = IndexOps::create_file(&db, req).unwrap();

        let opts = ListOptions {
            cursor: Some(encode_cursor(&entry_key(
                "c2",
                record.uploaded_at,
                &record.id,
            ))),
            ..Default::default()
        };
        let err = IndexOps::list_by_partition(&db, IndexKind::Conversation, "c1", &opts)
            .unwrap_err();
        assert!(matches!(err, AppError::BadCursor));

        let opts = ListOptions {
            cursor: Some("zz-not-hex".to_string()),
            ..Default::default()
        };
        let err = IndexOps::list_by_partition(&db, IndexKind::Conversation, "c1", &opts)
            .unwrap_err();
        assert!(matches!(err, AppError::BadCursor));
    }

    #[test]
    fn test_list_filters_by_category() {
        let (db, _temp) = setup_test_db();

        let image = IndexOps::create_file(&db, request("a.png")).unwrap();
        let mut req = request("b.mp4");
        req.category = FileCategory::Video;
        IndexOps::create_file(&db, req).unwrap();

        let opts = ListOptions {
            category: Some(FileCategory::Image),
            ..Default::default()
        };
        let page =
            IndexOps::list_by_partition(&db, IndexKind::Conversation, "c1", &opts).unwrap();
        assert_eq!(page.files.len(), 1);
        assert_eq!(page.files[0].id, image.id);
    }

    #[test]
    fn test_list_skips_unresolvable_index_entries() {
        let (db, _temp) = setup_test_db();

        let record = IndexOps::create_file(&db, request("a.png")).unwrap();
        // orphan the pointers by dropping only the primary record
        db.files.tree.remove(record.id.as_bytes()).unwrap();

        let page = IndexOps::list_by_partition(
            &db,
            IndexKind::Conversation,
            "c1",
            &ListOptions::default(),
        )
        .unwrap();
        assert!(page.files.is_empty());
    }

    #[test]
    fn test_search_matches_name_and_metadata() {
        let (db, _temp) = setup_test_db();

        let mut req = request("Quarterly-Report.pdf");
        req.category = FileCategory::Document;
        req.metadata = Some(
            [("source".to_string(), "Finance".to_string())]
                .into_iter()
                .collect(),
        );
        let report = IndexOps::create_file(&db, req).unwrap();
        IndexOps::create_file(&db, request("holiday.png")).unwrap();

        let by_name = IndexOps::search(&db, "quarterly", &SearchOptions::default()).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, report.id);

        let by_metadata = IndexOps::search(&db, "finance", &SearchOptions::default()).unwrap();
        assert_eq!(by_metadata.len(), 1);
        assert_eq!(by_metadata[0].id, report.id);

        let by_category = IndexOps::search(&db, "document", &SearchOptions::default()).unwrap();
        assert_eq!(by_category.len(), 1);

        assert!(IndexOps::search(&db, "nothing-here", &SearchOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_honors_filters() {
        let (db, _temp) = setup_test_db();

        let mut req = request("cat.png");
        req.uploaded_by = Some("u2".to_string());
        IndexOps::create_file(&db, req).unwrap();
        let mine = IndexOps::create_file(&db, request("cat-2.png")).unwrap();

        let opts = SearchOptions {
            uploader_id: Some("u1".to_string()),
            ..Default::default()
        };
        let results = IndexOps::search(&db, "cat", &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, mine.id);

        IndexOps::soft_delete(&db, &mine.id).unwrap();
        let results = IndexOps::search(&db, "cat", &opts).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_aggregate_stats() {
        let (db, _temp) = setup_test_db();

        let mut req = request("a.png");
        req.size_bytes = 100;
        req.uploaded_at = Some(at(2024, 1, 1));
        IndexOps::create_file(&db, req).unwrap();

        let mut req = request("b.mp4");
        req.category = FileCategory::Video;
        req.size_bytes = 300;
        req.uploaded_by = Some("u2".to_string());
        req.uploaded_at = Some(at(2024, 2, 1));
        let big = IndexOps::create_file(&db, req).unwrap();

        let summary = IndexOps::aggregate_stats(&db, &StatsQuery::default()).unwrap();
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.total_size_bytes, 400);
        assert_eq!(summary.average_size_bytes, 200);
        assert_eq!(summary.by_category.get("image"), Some(&1));
        assert_eq!(summary.by_category.get("video"), Some(&1));
        assert_eq!(summary.by_uploader.get("u1"), Some(&1));
        assert_eq!(summary.by_uploader.get("u2"), Some(&1));
        assert_eq!(summary.largest.as_ref().unwrap().id, big.id);
        assert_eq!(summary.most_recent.as_ref().unwrap().id, big.id);

        // date-range bound applied after the scan filters
        let query = StatsQuery {
            end_date: Some(at(2024, 1, 15)),
            ..Default::default()
        };
        let january = IndexOps::aggregate_stats(&db, &query).unwrap();
        assert_eq!(january.total_count, 1);
        assert_eq!(january.total_size_bytes, 100);

        IndexOps::soft_delete(&db, &big.id).unwrap();
        let active_only = IndexOps::aggregate_stats(&db, &StatsQuery::default()).unwrap();
        assert_eq!(active_only.total_count, 1);
    }

    #[test]
    fn test_apply_atomic_rejects_oversized_batch() {
        let (db, _temp) = setup_test_db();

        let ops: Vec<BatchOp> = (0..crate::config::MAX_BATCH_OPS + 1)
            .map(|i| BatchOp::Delete {
                target: BatchTarget::Files,
                key: format!("k{}", i).into_bytes(),
            })
            .collect();
        let err = db.apply_atomic(&ops).unwrap_err();
        assert!(matches!(err, AppError::BatchTooLarge(_)));
    }

    #[test]
    fn test_update_missing_file_is_not_found() {
        let (db, _temp) = setup_test_db();

        let patch = UpdateFileRequest {
            is_active: Some(false),
            ..Default::default()
        };
        let err = IndexOps::update_indexed_fields(&db, "no-such-id", patch).unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}
