//! Prescription Handlers
//!
//! Prescriptions need the `prescription_handling` feature. USER-role staff
//! only see and edit what they uploaded; validation and rejection are for
//! pharmacists and administrators.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{PrescriptionFilter, PrescriptionRepository};
use pharmy_models::{
    AuditAction, AuditEntry, CreatePrescription, Feature, Page, PageRequest, Prescription, PrescriptionDetail,
    PrescriptionItem, PrescriptionStatus, UpdatePrescription, UserRole, DEFAULT_PAGE_SIZE,
};
use pharmy_utils::rx::ExtractedMedicine;
use pharmy_utils::{
    sanitize_file_name, validate_file_size, validate_file_type, validate_model, PharmyError, PharmyResult,
};

use super::{parse_field, record_audit, search_term};
use crate::middleware::{load_tenant, AuthUser};
use crate::AppState;

const ALLOWED_UPLOAD_TYPES: &[&str] = &["jpg", "jpeg", "png", "pdf"];

#[derive(Debug, Deserialize)]
pub struct ListPrescriptionsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub prescription: PrescriptionDetail,
    pub ocr: OcrSummary,
}

#[derive(Debug, Default, Serialize)]
pub struct OcrSummary {
    pub performed: bool,
    pub confidence: Option<f64>,
    pub medicines_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/v1/prescriptions
pub async fn list_prescriptions(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListPrescriptionsQuery>,
) -> PharmyResult<Json<Page<Prescription>>> {
    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::PrescriptionHandling)?;

    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let filter = PrescriptionFilter {
        status: parse_field(query.status.as_deref(), "status", PrescriptionStatus::from_str)?,
        search: search_term(query.search),
        uploaded_by: (caller.role == UserRole::User).then_some(caller.user_id),
    };

    let (prescriptions, total) = PrescriptionRepository::new(state.pool.clone())
        .list(caller.tenant_id, &filter, page)
        .await?;
    Ok(Json(Page::new(prescriptions, page, total)))
}

/// POST /api/v1/prescriptions
pub async fn create_prescription(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<CreatePrescription>,
) -> PharmyResult<(StatusCode, Json<PrescriptionDetail>)> {
    validate_model(&request)?;
    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::PrescriptionHandling)?;

    let prescription = Prescription::new(caller.tenant_id, caller.user_id, &request);
    let items: Vec<PrescriptionItem> = request
        .items
        .iter()
        .map(|item| PrescriptionItem::from_request(prescription.id, item))
        .collect();

    PrescriptionRepository::new(state.pool.clone())
        .create(&prescription, &items)
        .await?;

    tracing::info!(prescription_id = %prescription.id, items = items.len(), "Prescription created");
    Ok((StatusCode::CREATED, Json(PrescriptionDetail { prescription, items })))
}

/// GET /api/v1/prescriptions/:id
pub async fn get_prescription(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<PrescriptionDetail>> {
    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::PrescriptionHandling)?;

    let detail = PrescriptionRepository::new(state.pool.clone())
        .find_detail(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Prescription"))?;
    ensure_visible(&caller, &detail.prescription)?;

    Ok(Json(detail))
}

/// Edits details and items, or moves the status. Setting VALIDATED or
/// REJECTED records the reviewer and is final.
///
/// PUT /api/v1/prescriptions/:id
pub async fn update_prescription(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePrescription>,
) -> PharmyResult<Json<PrescriptionDetail>> {
    validate_model(&request)?;
    if let Some(items) = &request.items {
        for item in items {
            validate_model(item)?;
        }
    }
    let target = parse_field(request.status.as_deref(), "status", PrescriptionStatus::from_str)?;
    if target.is_some_and(|s| s.is_terminal()) {
        caller.require_staff()?;
    }

    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::PrescriptionHandling)?;

    let prescriptions = PrescriptionRepository::new(state.pool.clone());
    let mut prescription = prescriptions
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Prescription"))?;
    ensure_visible(&caller, &prescription)?;

    if prescription.status.is_terminal() {
        return Err(PharmyError::validation(
            "status",
            format!("Prescription is already {}", prescription.status),
        ));
    }

    let previous_status = prescription.status;
    request.apply_details(&mut prescription);

    if let Some(target) = target {
        if target != prescription.status {
            if !prescription.status.can_transition_to(target) {
                return Err(PharmyError::validation(
                    "status",
                    format!("Cannot move prescription from {} to {}", prescription.status, target),
                ));
            }
            prescription.status = target;
            if target.is_terminal() {
                prescription.validated_by = Some(caller.user_id);
            }
        }
    }

    let items: Option<Vec<PrescriptionItem>> = request.items.as_ref().map(|items| {
        items
            .iter()
            .map(|item| PrescriptionItem::from_request(prescription.id, item))
            .collect()
    });
    if !prescriptions
        .update(&prescription, previous_status, items.as_deref())
        .await?
    {
        return Err(PharmyError::conflict(
            "Prescription was changed by another request, reload and try again",
        ));
    }

    if prescription.status != previous_status && prescription.status.is_terminal() {
        let action = match prescription.status {
            PrescriptionStatus::Validated => AuditAction::PrescriptionValidated,
            _ => AuditAction::PrescriptionRejected,
        };
        record_audit(
            &state,
            AuditEntry::new(
                caller.tenant_id,
                action,
                "prescription",
                prescription.id,
                Some(caller.user_id),
                json!({
                    "patient_name": prescription.patient_name,
                    "from": previous_status.as_str(),
                    "notes": prescription.notes,
                }),
            ),
        )
        .await;
        tracing::info!(
            prescription_id = %prescription.id,
            status = %prescription.status,
            reviewer = %caller.user_id,
            "Prescription reviewed"
        );
    }

    let items = match items {
        Some(items) => items,
        None => prescriptions.items(prescription.id).await?,
    };
    Ok(Json(PrescriptionDetail { prescription, items }))
}

/// DELETE /api/v1/prescriptions/:id
pub async fn delete_prescription(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<serde_json::Value>> {
    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::PrescriptionHandling)?;

    let prescriptions = PrescriptionRepository::new(state.pool.clone());
    let prescription = prescriptions
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Prescription"))?;

    if prescription.uploaded_by != caller.user_id && !caller.is_admin() {
        return Err(PharmyError::forbidden());
    }
    if prescriptions.referenced_by_sales(caller.tenant_id, id).await? {
        return Err(PharmyError::validation(
            "prescription",
            "Cannot delete a prescription that has been used for sales",
        ));
    }
    if !prescriptions.delete(caller.tenant_id, id).await? {
        return Err(PharmyError::not_found("Prescription"));
    }

    if prescription.file_url.is_some() {
        let dir = upload_dir(&state, id);
        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(error = %err, path = %dir.display(), "Failed to remove prescription files");
        }
    }

    Ok(super::deleted("Prescription"))
}

/// Accepts a scanned prescription (`file`) plus the patient fields as
/// multipart form data. Images go through OCR when available; an OCR failure
/// leaves the prescription without extracted text rather than failing the upload.
///
/// POST /api/v1/prescriptions/upload
pub async fn upload_prescription(
    State(state): State<AppState>,
    caller: AuthUser,
    mut multipart: Multipart,
) -> PharmyResult<(StatusCode, Json<UploadResponse>)> {
    let form = read_upload_form(&mut multipart).await?;
    let file = form
        .file
        .ok_or_else(|| PharmyError::validation("file", "No file provided"))?;

    validate_file_type(&file.name, ALLOWED_UPLOAD_TYPES)?;
    validate_file_size(file.data.len() as u64, state.config.uploads.max_file_size)?;
    validate_model(&form.details)?;

    let context = load_tenant(&state, &caller).await?;
    context.require_feature(Feature::PrescriptionHandling)?;

    let prescriptions = PrescriptionRepository::new(state.pool.clone());
    let mut prescription = Prescription::new(caller.tenant_id, caller.user_id, &form.details);
    prescriptions.create(&prescription, &[]).await?;

    let stored_name = sanitize_file_name(&file.name);
    if let Err(err) = store_file(&upload_dir(&state, prescription.id), &stored_name, &file.data).await {
        tracing::error!(error = %err, prescription_id = %prescription.id, "Failed to store prescription file");
        if let Err(cleanup) = prescriptions.delete(caller.tenant_id, prescription.id).await {
            tracing::error!(error = %cleanup, prescription_id = %prescription.id, "Failed to remove orphaned prescription");
        }
        return Err(PharmyError::internal("Failed to store uploaded file"));
    }

    let mut ocr = OcrSummary::default();
    let mut items = Vec::new();
    let content_type = file.content_type.unwrap_or_else(|| guess_content_type(&stored_name).to_string());
    let ocr_allowed = state.ocr.is_mock() || context.tier.has_feature(Feature::Ocr);

    if content_type.starts_with("image/") && state.ocr.is_enabled() && ocr_allowed {
        match state.ocr.extract(&stored_name, &content_type, &file.data).await {
            Ok(Some(result)) => {
                ocr.performed = true;
                ocr.confidence = Some(result.confidence);
                ocr.medicines_found = result.medicines.len();
                items = result
                    .medicines
                    .iter()
                    .map(|medicine| item_from_medicine(prescription.id, medicine))
                    .collect();
                prescription.extracted_text = Some(result.extracted_text);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, prescription_id = %prescription.id, "OCR extraction failed");
                ocr.error = Some("Text extraction failed".to_string());
            }
        }
    }

    prescription.file_url = Some(format!("prescriptions/{}/{}", prescription.id, stored_name));
    prescription.file_name = Some(stored_name);
    prescription.status = PrescriptionStatus::PendingValidation;
    prescription.updated_at = Utc::now();
    if !prescriptions
        .update(&prescription, PrescriptionStatus::Uploaded, Some(&items))
        .await?
    {
        return Err(PharmyError::conflict("Prescription was changed during upload"));
    }

    tracing::info!(
        prescription_id = %prescription.id,
        size = file.data.len(),
        ocr = ocr.performed,
        medicines = items.len(),
        "Prescription uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            prescription: PrescriptionDetail { prescription, items },
            ocr,
        }),
    ))
}

struct UploadedFile {
    name: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

struct UploadForm {
    file: Option<UploadedFile>,
    details: CreatePrescription,
}

async fn read_upload_form(multipart: &mut Multipart) -> PharmyResult<UploadForm> {
    let mut file = None;
    let mut details = CreatePrescription {
        patient_name: String::new(),
        patient_phone: None,
        patient_age: None,
        doctor_name: None,
        notes: None,
        items: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PharmyError::validation("file", format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| PharmyError::validation("file", format!("Failed to read file data: {}", e)))?;
            file = Some(UploadedFile {
                name: file_name,
                content_type,
                data: data.to_vec(),
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| PharmyError::validation(&name, format!("Failed to read field: {}", e)))?;
        let value = value.trim().to_string();
        let optional = (!value.is_empty()).then(|| value.clone());
        match name.as_str() {
            "patient_name" => details.patient_name = value,
            "patient_phone" => details.patient_phone = optional,
            "doctor_name" => details.doctor_name = optional,
            "notes" => details.notes = optional,
            "patient_age" => {
                details.patient_age = optional
                    .map(|age| {
                        age.parse::<i32>()
                            .map_err(|_| PharmyError::validation("patient_age", "Patient age must be a number"))
                    })
                    .transpose()?;
            }
            _ => {}
        }
    }

    Ok(UploadForm { file, details })
}

fn ensure_visible(caller: &AuthUser, prescription: &Prescription) -> PharmyResult<()> {
    if caller.role == UserRole::User && prescription.uploaded_by != caller.user_id {
        return Err(PharmyError::forbidden());
    }
    Ok(())
}

fn upload_dir(state: &AppState, prescription_id: Uuid) -> PathBuf {
    FsPath::new(&state.config.uploads.storage_dir)
        .join("prescriptions")
        .join(prescription_id.to_string())
}

async fn store_file(dir: &FsPath, file_name: &str, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(file_name), data).await
}

fn guess_content_type(file_name: &str) -> &'static str {
    let extension = FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn item_from_medicine(prescription_id: Uuid, medicine: &ExtractedMedicine) -> PrescriptionItem {
    PrescriptionItem {
        id: Uuid::new_v4(),
        prescription_id,
        product_id: None,
        medicine_name: medicine.name.clone(),
        dosage: medicine.dosage.clone(),
        quantity: medicine.quantity,
        instructions: medicine.instructions.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: UserRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role,
        }
    }

    fn prescription_by(uploader: Uuid) -> Prescription {
        let request = CreatePrescription {
            patient_name: "Ravi Kumar".to_string(),
            patient_phone: None,
            patient_age: Some(42),
            doctor_name: None,
            notes: None,
            items: Vec::new(),
        };
        Prescription::new(Uuid::new_v4(), uploader, &request)
    }

    #[test]
    fn test_user_role_sees_only_own_prescriptions() {
        let user = caller(UserRole::User);
        assert!(ensure_visible(&user, &prescription_by(user.user_id)).is_ok());

        let err = ensure_visible(&user, &prescription_by(Uuid::new_v4())).unwrap_err();
        assert_eq!(err.http_status_code(), 403);

        let pharmacist = caller(UserRole::Pharmacist);
        assert!(ensure_visible(&pharmacist, &prescription_by(Uuid::new_v4())).is_ok());
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("scan.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("scan.png"), "image/png");
        assert_eq!(guess_content_type("scan.pdf"), "application/pdf");
        assert_eq!(guess_content_type("scan"), "application/octet-stream");
    }

    #[test]
    fn test_item_from_medicine() {
        let id = Uuid::new_v4();
        let medicine = ExtractedMedicine {
            name: "Paracetamol".to_string(),
            dosage: Some("500mg".to_string()),
            quantity: Some(10),
            instructions: Some("twice daily".to_string()),
            confidence: 0.8,
        };
        let item = item_from_medicine(id, &medicine);
        assert_eq!(item.prescription_id, id);
        assert_eq!(item.medicine_name, "Paracetamol");
        assert_eq!(item.quantity, Some(10));
        assert!(item.product_id.is_none());
    }

    #[tokio::test]
    async fn test_store_file_creates_directories() {
        let dir = std::env::temp_dir()
            .join(format!("pharmy-upload-{}", Uuid::new_v4()))
            .join("prescriptions");
        store_file(&dir, "scan.png", b"png-bytes").await.unwrap();

        let written = tokio::fs::read(dir.join("scan.png")).await.unwrap();
        assert_eq!(written, b"png-bytes");
        let _ = tokio::fs::remove_dir_all(dir.parent().unwrap()).await;
    }
}
