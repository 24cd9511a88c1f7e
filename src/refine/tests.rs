use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use serde_json::{Map, Value, json};
use tempfile::TempDir;

use super::checkpoint::{CHECKPOINT_VERSION, Checkpoint, load_checkpoint, save_checkpoint};
use super::engine::{FieldProgress, FieldState, classify};
use super::fields::{FIELD_STRATEGIES, LATE_FIELDS, REQUIRED_FIELDS, ref_name, review_ref_names};
use super::provenance::ProvenanceRecorder;
use super::record::{GrantRecord, normalize_minimis, vector_id_from_stem};
use super::*;
use crate::backend::{Decision, DecisionRequest, Embedder, FieldDecider, LocalHashEmbedder};
use crate::error::{BackendError, is_batch_fatal};
use crate::index::VectorIndex;
use crate::model::{Chunk, ContentType, EvidenceRef};
use crate::semantic::SemanticModelConfig;

type Rule = dyn Fn(&DecisionRequest<'_>) -> Result<Decision, BackendError> + Send + Sync;

struct ScriptedDecider {
    rule: Box<Rule>,
    calls: Mutex<Vec<(String, Vec<Chunk>)>>,
}

impl ScriptedDecider {
    fn new(
        rule: impl Fn(&DecisionRequest<'_>) -> Result<Decision, BackendError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rule: Box::new(rule),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn silent() -> Self {
        Self::new(|_| Ok(Decision::default()))
    }

    fn calls_for(&self, field: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(called, _)| called == field)
            .count()
    }

    fn evidence_for(&self, field: &str) -> Vec<Chunk> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .find(|(called, _)| called == field)
            .map(|(_, evidence)| evidence.clone())
            .unwrap_or_default()
    }
}

impl FieldDecider for ScriptedDecider {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, BackendError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((request.field.to_string(), request.evidence.to_vec()));
        (self.rule)(request)
    }
}

fn cite(request: &DecisionRequest<'_>, fragment: &str, value: &str) -> Decision {
    Decision {
        value: value.to_string(),
        evidence: request
            .evidence
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.fragment == fragment)
            .map(|(index, _)| index)
            .collect(),
    }
}

fn chunk(fragment: &str, content_type: ContentType, content: &str) -> Chunk {
    Chunk {
        document_id: "G1_ficha".to_string(),
        fragment: fragment.to_string(),
        content_type,
        content: content.to_string(),
    }
}

fn fixture_chunks() -> Vec<Chunk> {
    vec![
        chunk(
            "1-1",
            ContentType::Text,
            "Convocatoria del Centro para el Desarrollo Tecnológico y la Innovación (CDTI) para proyectos de I+D.",
        ),
        chunk(
            "3-1",
            ContentType::Text,
            "El plazo de presentación de solicitudes finaliza el 12 de julio de 2022.",
        ),
        chunk(
            "4-1",
            ContentType::Text,
            "La ayuda es aplicable en todo el territorio nacional, toda España.",
        ),
        chunk(
            "5",
            ContentType::Table,
            "Pequeña empresa | 70%\nMediana empresa | 60%\nGran empresa | 50%",
        ),
    ]
}

fn draft(overrides: &[(&str, &str)]) -> GrantRecord {
    let mut fields = Map::new();
    for field in REQUIRED_FIELDS {
        fields.insert(field.to_string(), Value::String(String::new()));
    }
    fields.insert(
        "Nombre de la convocatoria".to_string(),
        json!("Misiones de I+D en Inteligencia Artificial"),
    );
    fields.insert("Linea de la convocatoria".to_string(), json!("Línea 1"));
    fields.insert("Minimis".to_string(), json!("false"));
    for (field, value) in overrides {
        fields.insert(field.to_string(), json!(value));
    }
    GrantRecord::from_fields("G1_ficha", fields).expect("draft is complete")
}

struct Workspace {
    _temp: TempDir,
    layout: ArtifactLayout,
    index_dir: std::path::PathBuf,
}

fn workspace(embedder: &LocalHashEmbedder) -> Workspace {
    let temp = TempDir::new().expect("tempdir");
    let index_dir = temp.path().join("vec").join("G1");
    let mut index = VectorIndex::open(&index_dir, embedder).expect("index opens");
    index.index(&fixture_chunks()).expect("fixture indexed");
    let layout = ArtifactLayout::under(&temp.path().join("json"));
    Workspace {
        _temp: temp,
        layout,
        index_dir,
    }
}

fn read_json(path: &Path) -> Map<String, Value> {
    let raw = fs::read(path).expect("artifact exists");
    match serde_json::from_slice::<Value>(&raw).expect("artifact is json") {
        Value::Object(map) => map,
        other => panic!("artifact is not an object: {other}"),
    }
}

fn run_engine(
    workspace: &Workspace,
    embedder: &LocalHashEmbedder,
    decider: &ScriptedDecider,
    record: GrantRecord,
) -> anyhow::Result<RefineOutcome> {
    let index = VectorIndex::open(&workspace.index_dir, embedder).expect("index reopens");
    RefineEngine::new(decider).refine(record, &index, &workspace.layout)
}

#[test]
fn empty_deadline_is_filled_from_cited_fragment() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| {
        if request.field == "Fecha de fin de la convocatoria" {
            Ok(cite(request, "3-1", "12 de julio de 2022"))
        } else {
            Ok(Decision::default())
        }
    });

    let outcome = run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    assert_eq!(
        refined["Fecha de fin de la convocatoria"],
        json!("12 de julio de 2022")
    );
    assert_eq!(
        reference["Fecha de fin de la convocatoria_ref"],
        json!([{ "id": "G1_ficha", "fragment": "3-1" }])
    );
    assert_eq!(outcome.corrected, 1);
    assert_eq!(outcome.verified, 0);
}

#[test]
fn table_biased_field_sees_the_table_first_and_keeps_pairings() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| {
        if request.field == "Intensidad de la subvención" {
            Ok(cite(
                request,
                "5",
                "Pequeña empresa: 70%; Mediana empresa: 60%; Gran empresa: 50%",
            ))
        } else {
            Ok(Decision::default())
        }
    });

    run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    let evidence = decider.evidence_for("Intensidad de la subvención");
    assert_eq!(evidence.first().map(|chunk| chunk.content_type), Some(ContentType::Table));
    assert_eq!(
        evidence.iter().filter(|chunk| chunk.fragment == "5").count(),
        1,
        "table lead and mixed search must not duplicate the table"
    );

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    let value = refined["Intensidad de la subvención"]
        .as_str()
        .expect("string value");
    assert!(value.contains("Pequeña empresa: 70%"));
    assert!(value.contains("Mediana empresa: 60%"));
    assert_eq!(
        reference["Intensidad de la subvención_ref"],
        json!([{ "id": "G1_ficha", "fragment": "5" }])
    );
}

#[test]
fn contradicted_value_is_overwritten() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| {
        if request.field == "Región de aplicación" {
            assert_eq!(request.current_value, "Cataluña");
            Ok(cite(request, "4-1", "Toda España"))
        } else {
            Ok(Decision::default())
        }
    });

    let outcome = run_engine(
        &workspace,
        &embedder,
        &decider,
        draft(&[("Región de aplicación", "Cataluña")]),
    )
    .expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    assert_eq!(refined["Región de aplicación"], json!("Toda España"));
    assert_eq!(
        reference["Región de aplicación_ref"],
        json!([{ "id": "G1_ficha", "fragment": "4-1" }])
    );
    assert_eq!(outcome.corrected, 1);
    assert_eq!(decider.calls_for("Región de aplicación"), 1);
}

#[test]
fn consistent_value_is_verified_and_may_be_expanded() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| {
        if request.field == "Organismo convocante" {
            Ok(cite(
                request,
                "1-1",
                "CDTI, Centro para el Desarrollo Tecnológico y la Innovación",
            ))
        } else {
            Ok(Decision::default())
        }
    });

    let outcome = run_engine(
        &workspace,
        &embedder,
        &decider,
        draft(&[("Organismo convocante", "CDTI")]),
    )
    .expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    assert_eq!(
        refined["Organismo convocante"],
        json!("CDTI, Centro para el Desarrollo Tecnológico y la Innovación")
    );
    assert_eq!(outcome.verified, 1);
    assert_eq!(outcome.corrected, 0);
}

#[test]
fn minimis_false_without_evidence_gets_the_sentinel() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::silent();

    run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    assert_eq!(refined["Minimis"], json!(false));
    assert_eq!(reference["Minimis_ref"], json!([{ "id": "-1", "fragment": "-1" }]));
    assert_eq!(reference["Organismo convocante_ref"], json!([]));
}

#[test]
fn minimis_true_without_evidence_has_no_references() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::silent();

    run_engine(&workspace, &embedder, &decider, draft(&[("Minimis", "Sí")])).expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    assert_eq!(refined["Minimis"], json!(true));
    assert_eq!(reference["Minimis_ref"], json!([]));
}

#[test]
fn attempts_never_exceed_each_field_budget() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::silent();

    let outcome = run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    for strategy in &FIELD_STRATEGIES {
        assert_eq!(
            decider.calls_for(strategy.field),
            strategy.max_attempts,
            "{} used the wrong number of attempts",
            strategy.field
        );
    }
    assert_eq!(decider.calls_for("Tipo de financiación"), 3);
    assert_eq!(decider.calls_for("Minimis"), 2);
    assert_eq!(decider.calls_for("Organismo convocante"), 1);
    assert_eq!(outcome.unresolved, FIELD_STRATEGIES.len());
}

#[test]
fn success_stops_further_attempts() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| {
        if request.field == "Forma y plazo de cobro" {
            Ok(cite(request, "3-1", "Pago anticipado"))
        } else {
            Ok(Decision::default())
        }
    });

    run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");
    assert_eq!(decider.calls_for("Forma y plazo de cobro"), 1);
}

#[test]
fn malformed_decision_counts_as_an_empty_attempt() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let seen = Mutex::new(0usize);
    let decider = ScriptedDecider::new(move |request| {
        if request.field != "Tipo de financiación" {
            return Ok(Decision::default());
        }
        let mut count = seen.lock().expect("counter lock");
        *count += 1;
        if *count == 1 {
            Err(BackendError::Malformed("not json".to_string()))
        } else {
            Ok(cite(request, "1-1", "Subvención"))
        }
    });

    run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    assert_eq!(refined["Tipo de financiación"], json!("Subvención"));
    assert_eq!(decider.calls_for("Tipo de financiación"), 2);
}

#[test]
fn uncited_or_out_of_range_support_is_not_evidence() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| match request.field {
        "Anio" => Ok(Decision {
            value: "2022".to_string(),
            evidence: vec![99],
        }),
        "Beneficiarios" => Ok(Decision {
            value: "Pymes".to_string(),
            evidence: Vec::new(),
        }),
        _ => Ok(Decision::default()),
    });

    run_engine(
        &workspace,
        &embedder,
        &decider,
        draft(&[("Anio", "2021")]),
    )
    .expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    assert_eq!(refined["Anio"], json!("2021"));
    assert_eq!(refined["Beneficiarios"], json!(""));
    assert_eq!(reference["Anio_ref"], json!([]));
    assert_eq!(reference["Beneficiarios_ref"], json!([]));
}

#[test]
fn artifacts_cover_every_draft_field_and_exactly_the_review_refs() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::silent();

    let mut record = draft(&[]);
    record
        .fields
        .insert("Campo adicional".to_string(), json!("se conserva"));
    run_engine(&workspace, &embedder, &decider, record).expect("refine");

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    for field in REQUIRED_FIELDS.iter().chain(LATE_FIELDS.iter()) {
        assert!(refined.contains_key(*field), "refined is missing {field}");
    }
    assert_eq!(refined["Campo adicional"], json!("se conserva"));

    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    let keys = reference.keys().cloned().collect::<Vec<String>>();
    assert_eq!(keys, review_ref_names());
    assert!(!workspace.layout.state_path("G1_ficha").exists());
}

#[test]
fn fatal_decider_failure_keeps_checkpoint_and_resume_skips_settled_fields() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);

    let failing = ScriptedDecider::new(|request| match request.field {
        "Organismo convocante" => Ok(cite(request, "1-1", "CDTI")),
        "Fecha de fin de la convocatoria" => Ok(cite(request, "3-1", "12 de julio de 2022")),
        "Beneficiarios" => Err(BackendError::Permanent("401 Unauthorized".to_string())),
        _ => Ok(Decision::default()),
    });
    let error = run_engine(&workspace, &embedder, &failing, draft(&[]))
        .expect_err("permanent backend failure aborts the record");
    assert!(is_batch_fatal(&error));
    assert!(workspace.layout.state_path("G1_ficha").is_file());
    assert!(!workspace.layout.is_complete("G1_ficha"));

    let resumed = ScriptedDecider::silent();
    let outcome = run_engine(&workspace, &embedder, &resumed, draft(&[])).expect("resume");

    assert!(outcome.resumed);
    assert_eq!(resumed.calls_for("Organismo convocante"), 0);
    assert_eq!(resumed.calls_for("Fecha de fin de la convocatoria"), 0);
    assert_eq!(resumed.calls_for("Fecha de inicio de la convocatoria"), 0);
    assert_eq!(resumed.calls_for("Beneficiarios"), 1);

    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    let reference = read_json(&workspace.layout.reference_path("G1_ficha"));
    assert_eq!(refined["Organismo convocante"], json!("CDTI"));
    assert_eq!(
        reference["Fecha de fin de la convocatoria_ref"],
        json!([{ "id": "G1_ficha", "fragment": "3-1" }])
    );
    assert_eq!(outcome.corrected, 2);
    assert!(!workspace.layout.state_path("G1_ficha").exists());
}

#[test]
fn classify_distinguishes_verify_correct_and_nothing() {
    let evidence = fixture_chunks();
    let supported = |value: &str| Decision {
        value: value.to_string(),
        evidence: vec![1, 1, 7],
    };

    let verified = classify("12 de Julio de 2022", &supported("12 de julio  de 2022"), &evidence)
        .expect("usable");
    assert_eq!(verified.state, FieldState::Verified);
    assert_eq!(verified.value, "12 de Julio de 2022");
    assert_eq!(
        verified.refs,
        vec![EvidenceRef {
            id: "G1_ficha".to_string(),
            fragment: "3-1".to_string(),
        }]
    );

    let corrected = classify("30 de junio", &supported("12 de julio de 2022"), &evidence)
        .expect("usable");
    assert_eq!(corrected.state, FieldState::Corrected);

    let filled = classify("", &supported("12 de julio de 2022"), &evidence).expect("usable");
    assert_eq!(filled.state, FieldState::Corrected);

    assert!(classify("x", &supported("   "), &evidence).is_none());
    assert!(
        classify(
            "x",
            &Decision {
                value: "y".to_string(),
                evidence: vec![42],
            },
            &evidence
        )
        .is_none()
    );
}

#[test]
fn recorder_appends_without_duplicates() {
    let mut recorder = ProvenanceRecorder::new("G1_ficha");
    let first = EvidenceRef {
        id: "G1_ficha".to_string(),
        fragment: "3-1".to_string(),
    };
    let second = EvidenceRef {
        id: "G1_orden".to_string(),
        fragment: "2".to_string(),
    };

    recorder.record("Anio_ref", &[first.clone()]);
    recorder.record("Anio_ref", &[first.clone()]);
    recorder.record("Anio_ref", &[second.clone(), first.clone()]);

    assert_eq!(recorder.refs("Anio_ref"), &[first, second]);
    assert!(!recorder.has_evidence("Minimis_ref"));
    assert_eq!(recorder.document_id(), "G1_ficha");
}

#[test]
fn vector_id_follows_underscore_rule() {
    assert_eq!(vector_id_from_stem("abc"), "abc");
    assert_eq!(vector_id_from_stem("abc_ficha"), "abc");
    assert_eq!(vector_id_from_stem("convo_abc_linea1"), "abc");
    assert_eq!(vector_id_from_stem("a_b_c_d"), "b");
}

#[test]
fn draft_loading_validates_and_fills_late_fields() {
    let temp = TempDir::new().expect("tempdir");
    let mut fields = Map::new();
    for field in REQUIRED_FIELDS {
        fields.insert(field.to_string(), json!(""));
    }
    let path = temp.path().join("convo_G7_linea1.json");
    fs::write(&path, serde_json::to_vec(&Value::Object(fields.clone())).expect("json"))
        .expect("write draft");

    let record = load_draft(&path).expect("draft loads");
    assert_eq!(record.document_id, "convo_G7_linea1");
    assert_eq!(record.vector_id, "G7");
    for field in LATE_FIELDS {
        assert_eq!(record.fields.get(field), Some(&json!("")));
    }
    assert_eq!(record.get_str("No existe"), "");

    fields.remove("Anio");
    fs::write(&path, serde_json::to_vec(&Value::Object(fields)).expect("json"))
        .expect("write draft");
    let error = load_draft(&path).expect_err("missing field rejected");
    assert!(error.to_string().contains("Anio"));

    fs::write(&path, b"[1, 2, 3]").expect("write draft");
    assert!(load_draft(&path).is_err());
}

#[test]
fn minimis_normalization_accepts_spanish_and_english_affirmatives() {
    for raw in ["true", "TRUE", " sí ", "Si", "yes"] {
        assert!(normalize_minimis(raw), "{raw} should be true");
    }
    for raw in ["false", "no", "", "quizás"] {
        assert!(!normalize_minimis(raw), "{raw} should be false");
    }
}

#[test]
fn every_reviewed_field_has_a_query_per_attempt() {
    assert_eq!(FIELD_STRATEGIES.len(), 18);
    for strategy in &FIELD_STRATEGIES {
        assert!(strategy.max_attempts >= 1);
        assert_eq!(strategy.attempt_budget(), strategy.max_attempts, "{}", strategy.field);
        let same_field = FIELD_STRATEGIES
            .iter()
            .filter(|other| other.field == strategy.field)
            .count();
        assert_eq!(same_field, 1, "{}", strategy.field);
    }
    let biased = FIELD_STRATEGIES
        .iter()
        .filter(|strategy| strategy.table_bias)
        .map(|strategy| strategy.field)
        .collect::<Vec<&str>>();
    assert_eq!(
        biased,
        vec![
            "Intensidad de la subvención",
            "Intensidad del préstamo",
            "Tipo de consorcio",
            "Costes elegibles",
        ]
    );
    assert_eq!(ref_name("Anio"), "Anio_ref");
}

fn checkpoint_with(version: u32, fields: &[(&str, FieldState, usize)]) -> Checkpoint {
    Checkpoint {
        checkpoint_version: version,
        document_id: "G1_ficha".to_string(),
        updated_at: "2024-01-01T00:00:00Z".to_string(),
        record: draft(&[]).fields,
        provenance: ProvenanceRecorder::new("G1_ficha"),
        fields: fields
            .iter()
            .map(|(field, state, attempts)| {
                (
                    field.to_string(),
                    FieldProgress {
                        state: *state,
                        attempts: *attempts,
                    },
                )
            })
            .collect::<BTreeMap<String, FieldProgress>>(),
    }
}

#[test]
fn resume_only_spends_the_attempts_left_in_each_budget() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    save_checkpoint(
        &workspace.layout.state_path("G1_ficha"),
        &checkpoint_with(
            CHECKPOINT_VERSION,
            &[
                ("Tipo de financiación", FieldState::Empty, 1),
                ("Fecha de fin de la convocatoria", FieldState::Empty, 1),
            ],
        ),
    )
    .expect("checkpoint saved");

    let decider = ScriptedDecider::silent();
    let outcome = run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    assert!(outcome.resumed);
    assert_eq!(decider.calls_for("Tipo de financiación"), 2);
    assert_eq!(decider.calls_for("Fecha de fin de la convocatoria"), 0);
    assert_eq!(decider.calls_for("Organismo convocante"), 1);
}

#[test]
fn checkpoint_from_another_version_is_ignored() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let state_path = workspace.layout.state_path("G1_ficha");
    save_checkpoint(
        &state_path,
        &checkpoint_with(
            CHECKPOINT_VERSION + 1,
            &[("Organismo convocante", FieldState::Verified, 1)],
        ),
    )
    .expect("checkpoint saved");

    let error = load_checkpoint(&state_path).expect_err("version mismatch");
    assert!(format!("{error:#}").contains("version"));

    let decider = ScriptedDecider::silent();
    let outcome = run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");
    assert!(!outcome.resumed);
    assert_eq!(decider.calls_for("Organismo convocante"), 1);
    assert!(!state_path.exists());
}

/// Fails query embeddings that mention a deadline; everything else is local.
struct DeadlineQueryFails {
    inner: LocalHashEmbedder,
}

impl Embedder for DeadlineQueryFails {
    fn model(&self) -> &SemanticModelConfig {
        self.inner.model()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.iter().any(|text| text.contains("fecha límite")) {
            return Err(BackendError::Malformed("embedding has 0 dims".to_string()));
        }
        self.inner.embed_batch(texts)
    }
}

#[test]
fn failed_retrieval_leaves_the_field_unresolved_and_the_record_completes() {
    let local = LocalHashEmbedder::new(128);
    let workspace = workspace(&local);
    let embedder = DeadlineQueryFails {
        inner: LocalHashEmbedder::new(128),
    };
    let decider = ScriptedDecider::new(|request| match request.field {
        "Organismo convocante" => Ok(cite(request, "1-1", "CDTI")),
        _ => Ok(Decision::default()),
    });

    let index = VectorIndex::open(&workspace.index_dir, &embedder).expect("index reopens");
    let outcome = RefineEngine::new(&decider)
        .refine(draft(&[]), &index, &workspace.layout)
        .expect("record completes");

    assert_eq!(decider.calls_for("Fecha de fin de la convocatoria"), 0);
    assert_eq!(outcome.corrected, 1);
    let refined = read_json(&workspace.layout.refined_path("G1_ficha"));
    assert_eq!(refined["Organismo convocante"], json!("CDTI"));
    assert_eq!(refined["Fecha de fin de la convocatoria"], json!(""));
}

#[test]
fn rejected_decision_counts_as_no_evidence() {
    let embedder = LocalHashEmbedder::new(128);
    let workspace = workspace(&embedder);
    let decider = ScriptedDecider::new(|request| match request.field {
        "Tipo de financiación" => Err(BackendError::Rejected(
            "400 Bad Request: maximum context length exceeded".to_string(),
        )),
        "Fecha de fin de la convocatoria" => Ok(cite(request, "3-1", "12 de julio de 2022")),
        _ => Ok(Decision::default()),
    });

    let outcome = run_engine(&workspace, &embedder, &decider, draft(&[])).expect("refine");

    assert_eq!(decider.calls_for("Tipo de financiación"), 3);
    assert_eq!(outcome.corrected, 1);
    assert!(workspace.layout.is_complete("G1_ficha"));
}
