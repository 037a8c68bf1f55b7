use actix_web::{HttpRequest, HttpResponse, Responder, http::StatusCode, web};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::ipfs::ContentMetadata;
use crate::models::{Address, Role};
use crate::normalize::parse_amount;
use crate::signer::{SessionSigner, Signer};
use crate::writes::{MedicineChange, WriteOp, WriteOutcome, WriteReport};

/// Header carrying the connected wallet address.
pub const ACCOUNT_HEADER: &str = "x-account-address";

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/identity/{address}", web::get().to(get_identity))
        .route("/counterparties/{address}", web::get().to(get_counterparties))
        .route("/metadata", web::get().to(get_metadata))
        .route("/messages/{other}", web::get().to(get_conversation))
        .route("/messages", web::post().to(send_message))
        .route("/friends", web::post().to(add_friend))
        .route("/appointments", web::post().to(book_appointment))
        .route("/appointments/{id}/complete", web::post().to(complete_appointment))
        .route("/prescriptions", web::post().to(prescribe_medicine))
        .service(
            web::scope("/doctors")
                .route("", web::post().to(register_doctor))
                .route("/{id}/approve", web::post().to(approve_doctor))
                .route("/{id}/appointments", web::get().to(get_doctor_appointments)),
        )
        .service(
            web::scope("/patients")
                .route("", web::post().to(register_patient))
                .route("/{id}/orders", web::get().to(get_patient_orders))
                .route("/{id}/appointments", web::get().to(get_patient_appointments))
                .route("/{id}/prescriptions", web::get().to(get_patient_prescriptions))
                .route("/{id}/history", web::post().to(update_medical_history)),
        )
        .service(
            web::scope("/medicines")
                .route("", web::get().to(get_medicines))
                .route("", web::post().to(add_medicine))
                .route("/{id}", web::get().to(get_medicine))
                .route("/{id}", web::put().to(update_medicine))
                .route("/{id}/toggle", web::post().to(toggle_medicine))
                .route("/{id}/purchase", web::post().to(purchase_medicine)),
        );
}

fn session(req: &HttpRequest) -> SessionSigner {
    req.headers()
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(SessionSigner::connected)
        .unwrap_or_else(SessionSigner::disconnected)
}

fn error_response(err: GatewayError) -> HttpResponse {
    let status = match &err {
        GatewayError::LedgerRead { .. } | GatewayError::Decode { .. } | GatewayError::Blob(_) => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::WriteRejected { .. } | GatewayError::Arithmetic { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::WriteTimedOut { .. } | GatewayError::WriteUnknown { .. } => StatusCode::ACCEPTED,
        GatewayError::Signer(_) => StatusCode::UNAUTHORIZED,
    };
    HttpResponse::build(status).json(json!({ "error": err.to_string() }))
}

fn write_response(request_id: Uuid, report: WriteReport) -> HttpResponse {
    let status = match report.outcome {
        WriteOutcome::Confirmed { .. } => StatusCode::OK,
        WriteOutcome::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WriteOutcome::TimedOut { .. } | WriteOutcome::Unknown { .. } => StatusCode::ACCEPTED,
    };
    let retry_safe = report.outcome.retry_safe();
    let mut body = match serde_json::to_value(&report) {
        Ok(body) => body,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(json!({ "error": format!("could not encode write report: {e}") }));
        }
    };
    if let Value::Object(map) = &mut body {
        map.insert("retry_safe".into(), Value::Bool(retry_safe));
        map.insert("request_id".into(), Value::String(request_id.to_string()));
    }
    HttpResponse::build(status).json(body)
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": message.into() }))
}

/// Caller-supplied amount in the smallest currency unit.
fn amount(field: &str, raw: &Value) -> Result<u128, HttpResponse> {
    parse_amount(raw).ok_or_else(|| {
        bad_request(format!(
            "`{field}` must be a non-negative integer, decimal string or 0x hex string"
        ))
    })
}

fn discount(percent: u8) -> Result<(), HttpResponse> {
    if percent > 100 {
        return Err(bad_request("`discountPercent` must be between 0 and 100"));
    }
    Ok(())
}

async fn run_write(gateway: &Gateway, req: &HttpRequest, op: WriteOp) -> HttpResponse {
    let request_id = Uuid::new_v4();
    let signer = session(req);
    let span = info_span!("write", %request_id, operation = op.method());
    let report = gateway.execute(&signer, op).instrument(span).await;
    write_response(request_id, report)
}

/// Pins an inline base64 image, if any, and records its URL in the profile.
async fn pin_profile_with_image(
    gateway: &Gateway,
    name: &str,
    mut profile: Value,
    image_base64: Option<&str>,
) -> Result<String, HttpResponse> {
    if !profile.is_object() {
        profile = json!({});
    }
    if let Some(encoded) = image_base64.filter(|s| !s.is_empty()) {
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| bad_request(format!("image is not base64: {e}")))?;
        let meta = ContentMetadata {
            name: format!("{name}-image"),
            content_type: None,
        };
        let url = gateway.pin_bytes(bytes, meta).await.map_err(error_response)?;
        profile["image"] = Value::String(url);
    }
    if profile.get("name").is_none() {
        profile["name"] = Value::String(name.to_string());
    }
    gateway.pin_profile(&profile, name).await.map_err(error_response)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub async fn get_identity(gateway: web::Data<Gateway>, address: web::Path<String>) -> impl Responder {
    let address = Address::new(address.into_inner());
    match gateway.resolve_identity(&address).await {
        Ok(Some(identity)) => HttpResponse::Ok().json(identity),
        Ok(None) => HttpResponse::NotFound().json(json!({ "registered": false })),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct RoleQuery {
    role: Option<String>,
}

pub async fn get_counterparties(
    gateway: web::Data<Gateway>,
    address: web::Path<String>,
    query: web::Query<RoleQuery>,
) -> impl Responder {
    let address = Address::new(address.into_inner());
    let role = match query.role.as_deref() {
        Some(raw) => match Role::parse(raw) {
            Some(role) => role,
            None => return bad_request("unknown role"),
        },
        None => match gateway.role_of(&address).await {
            Ok(role) => role,
            Err(e) => return error_response(e),
        },
    };
    match gateway.counterparty_cards(role, &address).await {
        Ok(cards) => HttpResponse::Ok().json(cards),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct MetadataQuery {
    r#ref: String,
}

pub async fn get_metadata(gateway: web::Data<Gateway>, query: web::Query<MetadataQuery>) -> impl Responder {
    HttpResponse::Ok().json(gateway.resolve_metadata(&query.r#ref).await)
}

pub async fn get_conversation(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    other: web::Path<String>,
) -> impl Responder {
    let Some(me) = session(&req).address() else {
        return error_response(GatewayError::Signer("wallet not connected".into()));
    };
    match gateway.conversation(&me, &Address::new(other.into_inner())).await {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => error_response(e),
    }
}

pub async fn get_medicines(gateway: web::Data<Gateway>) -> impl Responder {
    match gateway.medicine_cards().await {
        Ok(cards) => HttpResponse::Ok().json(cards),
        Err(e) => error_response(e),
    }
}

pub async fn get_medicine(gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    match gateway.medicine(id.into_inner()).await {
        Ok(Some(medicine)) => HttpResponse::Ok().json(medicine),
        Ok(None) => HttpResponse::NotFound().json(json!({ "error": "medicine not found" })),
        Err(e) => error_response(e),
    }
}

pub async fn get_patient_orders(gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    match gateway.patient_orders(id.into_inner()).await {
        Ok(orders) => HttpResponse::Ok().json(orders),
        Err(e) => error_response(e),
    }
}

pub async fn get_patient_appointments(gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    match gateway.patient_appointments(id.into_inner()).await {
        Ok(appointments) => HttpResponse::Ok().json(appointments),
        Err(e) => error_response(e),
    }
}

pub async fn get_doctor_appointments(gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    match gateway.doctor_appointments(id.into_inner()).await {
        Ok(appointments) => HttpResponse::Ok().json(appointments),
        Err(e) => error_response(e),
    }
}

pub async fn get_patient_prescriptions(gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    match gateway.patient_prescriptions(id.into_inner()).await {
        Ok(prescriptions) => HttpResponse::Ok().json(prescriptions),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDoctorBody {
    name: String,
    #[serde(default)]
    profile: Value,
    image_base64: Option<String>,
}

pub async fn register_doctor(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    body: web::Json<RegisterDoctorBody>,
) -> impl Responder {
    let body = body.into_inner();
    let metadata_ref =
        match pin_profile_with_image(&gateway, &body.name, body.profile, body.image_base64.as_deref()).await {
            Ok(url) => url,
            Err(resp) => return resp,
        };
    let op = WriteOp::RegisterDoctor {
        name: body.name,
        metadata_ref,
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPatientBody {
    name: String,
    #[serde(default)]
    profile: Value,
    image_base64: Option<String>,
    #[serde(default)]
    medical_history: Vec<String>,
}

pub async fn register_patient(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    body: web::Json<RegisterPatientBody>,
) -> impl Responder {
    let body = body.into_inner();
    let metadata_ref =
        match pin_profile_with_image(&gateway, &body.name, body.profile, body.image_base64.as_deref()).await {
            Ok(url) => url,
            Err(resp) => return resp,
        };
    let op = WriteOp::RegisterPatient {
        name: body.name,
        metadata_ref,
        medical_history: body.medical_history,
    };
    run_write(&gateway, &req, op).await
}

pub async fn approve_doctor(req: HttpRequest, gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    let op = WriteOp::ApproveDoctor {
        doctor_id: id.into_inner(),
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentBody {
    patient_id: u64,
    doctor_id: u64,
    from: String,
    to: String,
    appointment_date: String,
    condition: String,
    #[serde(default)]
    message: String,
    fee: Value,
}

pub async fn book_appointment(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    body: web::Json<BookAppointmentBody>,
) -> impl Responder {
    let body = body.into_inner();
    let fee = match amount("fee", &body.fee) {
        Ok(fee) => fee,
        Err(resp) => return resp,
    };
    let op = WriteOp::BookAppointment {
        patient_id: body.patient_id,
        doctor_id: body.doctor_id,
        from: body.from,
        to: body.to,
        appointment_date: body.appointment_date,
        condition: body.condition,
        message: body.message,
        fee,
    };
    run_write(&gateway, &req, op).await
}

pub async fn complete_appointment(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    id: web::Path<u64>,
) -> impl Responder {
    let op = WriteOp::CompleteAppointment {
        appointment_id: id.into_inner(),
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    to: String,
    text: String,
}

pub async fn send_message(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    body: web::Json<SendMessageBody>,
) -> impl Responder {
    let body = body.into_inner();
    let op = WriteOp::SendMessage {
        to: Address::new(body.to),
        text: body.text,
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
pub struct AddFriendBody {
    address: String,
    name: String,
}

pub async fn add_friend(req: HttpRequest, gateway: web::Data<Gateway>, body: web::Json<AddFriendBody>) -> impl Responder {
    let body = body.into_inner();
    let op = WriteOp::AddCounterparty {
        address: Address::new(body.address),
        name: body.name,
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseBody {
    patient_id: u64,
    quantity: u64,
}

pub async fn purchase_medicine(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    id: web::Path<u64>,
    body: web::Json<PurchaseBody>,
) -> impl Responder {
    let request_id = Uuid::new_v4();
    let signer = session(&req);
    let span = info_span!("write", %request_id, operation = "buyMedicine");
    match gateway
        .purchase_medicine(&signer, body.patient_id, id.into_inner(), body.quantity)
        .instrument(span)
        .await
    {
        Ok(report) => write_response(request_id, report),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescribeBody {
    medicine_id: u64,
    patient_id: u64,
}

pub async fn prescribe_medicine(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    body: web::Json<PrescribeBody>,
) -> impl Responder {
    let op = WriteOp::PrescribeMedicine {
        medicine_id: body.medicine_id,
        patient_id: body.patient_id,
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
pub struct HistoryBody {
    entry: String,
}

pub async fn update_medical_history(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    id: web::Path<u64>,
    body: web::Json<HistoryBody>,
) -> impl Responder {
    let op = WriteOp::UpdateMedicalHistory {
        patient_id: id.into_inner(),
        entry: body.into_inner().entry,
    };
    run_write(&gateway, &req, op).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMedicineBody {
    name: String,
    #[serde(default)]
    profile: Value,
    image_base64: Option<String>,
    price: Value,
    quantity: u64,
    #[serde(default)]
    discount_percent: u8,
    location: String,
}

pub async fn add_medicine(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    body: web::Json<AddMedicineBody>,
) -> impl Responder {
    let body = body.into_inner();
    let price = match amount("price", &body.price) {
        Ok(price) => price,
        Err(resp) => return resp,
    };
    if let Err(resp) = discount(body.discount_percent) {
        return resp;
    }
    let metadata_ref =
        match pin_profile_with_image(&gateway, &body.name, body.profile, body.image_base64.as_deref()).await {
            Ok(url) => url,
            Err(resp) => return resp,
        };
    let op = WriteOp::AddMedicine {
        metadata_ref,
        price,
        quantity: body.quantity,
        discount_percent: body.discount_percent,
        location: body.location,
    };
    run_write(&gateway, &req, op).await
}

/// One field per request, e.g. `{"field":"price","value":"1000"}`.
#[derive(Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum MedicineUpdateBody {
    Price(Value),
    Quantity(Value),
    Discount(u8),
    Location(String),
}

pub async fn update_medicine(
    req: HttpRequest,
    gateway: web::Data<Gateway>,
    id: web::Path<u64>,
    body: web::Json<MedicineUpdateBody>,
) -> impl Responder {
    let change = match body.into_inner() {
        MedicineUpdateBody::Price(v) => amount("price", &v).map(MedicineChange::Price),
        MedicineUpdateBody::Quantity(v) => amount("quantity", &v).and_then(|q| {
            u64::try_from(q)
                .map(MedicineChange::Quantity)
                .map_err(|_| bad_request("`quantity` is too large"))
        }),
        MedicineUpdateBody::Discount(d) => discount(d).map(|_| MedicineChange::Discount(d)),
        MedicineUpdateBody::Location(l) => Ok(MedicineChange::Location(l)),
    };
    let change = match change {
        Ok(change) => change,
        Err(resp) => return resp,
    };
    let op = WriteOp::UpdateMedicine {
        medicine_id: id.into_inner(),
        change,
    };
    run_write(&gateway, &req, op).await
}

pub async fn toggle_medicine(req: HttpRequest, gateway: web::Data<Gateway>, id: web::Path<u64>) -> impl Responder {
    let op = WriteOp::UpdateMedicine {
        medicine_id: id.into_inner(),
        change: MedicineChange::ToggleActive,
    };
    run_write(&gateway, &req, op).await
}
