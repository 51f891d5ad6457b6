use claim_harness::db;
use claim_harness::key_facts::{active_facts, store_key_facts, FactSource};
use claim_harness::migrate;
use claim_harness_core::lexicon::Lexicon;
use claim_harness_core::models::NoteRecord;
use claim_harness_core::tokenizer::{DisabledTokenizer, ScriptRunTokenizer, Tokenizer};
use proptest::prelude::*;
use tempfile::TempDir;

fn arb_note() -> impl Strategy<Value = NoteRecord> {
    (
        "[今日はバグを修正した明日準備する学習雨テスト。\n ]{0,80}",
        proptest::option::of(0u8..=10),
        any::<bool>(),
    )
        .prop_map(|(body, mood, journal)| NoteRecord {
            id: "note-prop".to_string(),
            note_type: (if journal { "journal" } else { "memo" }).to_string(),
            body,
            journal_date: Some("2026-03-01".to_string()),
            mood_score: mood.map(f64::from),
            ..Default::default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_key_fact_replace_is_idempotent(note in arb_note(), scripted in any::<bool>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let tokenizer: Box<dyn Tokenizer> = if scripted {
            Box::new(ScriptRunTokenizer)
        } else {
            Box::new(DisabledTokenizer)
        };
        let lexicon = Lexicon::default();
        let source = FactSource::Note(note);

        let (first, second, again, active_first, active_second) = runtime.block_on(async {
            let tmp = TempDir::new().unwrap();
            let pool = db::connect_path(&tmp.path().join("facts.sqlite")).await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();

            let tok = tokenizer.as_ref();
            let first = store_key_facts(&pool, &source, tok, &lexicon, 12, 0.70, true)
                .await
                .unwrap();
            let mut active_first = active_facts(&pool, "note", "note-prop").await.unwrap();
            let second = store_key_facts(&pool, &source, tok, &lexicon, 12, 0.70, true)
                .await
                .unwrap();
            let mut active_second = active_facts(&pool, "note", "note-prop").await.unwrap();
            let again = store_key_facts(&pool, &source, tok, &lexicon, 12, 0.70, false)
                .await
                .unwrap();

            active_first.sort();
            active_second.sort();
            (first, second, again, active_first, active_second)
        });

        prop_assert_eq!(first.replaced, 0);
        prop_assert_eq!(first.duplicates, 0);
        prop_assert_eq!(
            first.inserted + first.invalid + first.low_confidence,
            first.extracted
        );
        prop_assert_eq!(second.replaced, first.inserted as u64);
        prop_assert_eq!(second.inserted, first.inserted);
        prop_assert_eq!(active_first.len(), first.inserted);
        prop_assert_eq!(active_first, active_second);
        prop_assert_eq!(again.inserted, 0);
        prop_assert_eq!(again.duplicates, second.inserted);
    }
}
