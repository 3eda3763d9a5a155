//! OCI distribution surface: thin glue between the registry HTTP protocol,
//! the entity store and blob files under `storage_root`.
//!
//! Manifest PUTs are idempotent by digest: the same bytes under any number
//! of references yield exactly one artifact entity.

use crate::client::EntityClient;
use crate::prelude::*;
use crate::records::{App, Artifact};
use crate::schema::core::ARTIFACT_MANIFEST_DIGEST;
use actix_web::{get, head, patch, post, put, web, HttpResponse};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

pub struct RegistryState {
    pub client: EntityClient,
    pub storage_root: PathBuf,
}

impl RegistryState {
    pub fn new(client: EntityClient, storage_root: PathBuf) -> AppResult<Self> {
        std::fs::create_dir_all(storage_root.join("blobs"))?;
        std::fs::create_dir_all(storage_root.join("uploads"))?;
        Ok(RegistryState {
            client,
            storage_root,
        })
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.storage_root.join("blobs").join(digest)
    }

    fn upload_path(&self, uuid: &str) -> PathBuf {
        self.storage_root.join("uploads").join(uuid)
    }
}

pub fn sha256_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("sha256:{}", hex)
}

async fn find_artifact_by_digest(
    client: &EntityClient,
    digest: &str,
) -> AppResult<Option<Artifact>> {
    let mut artifact = Artifact::default();
    match client
        .one_at_index(
            ARTIFACT_MANIFEST_DIGEST,
            &crate::entity::value::Value::String(digest.to_string()),
            &mut artifact,
        )
        .await
    {
        Ok(()) => Ok(Some(artifact)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn resolve_manifest(
    state: &RegistryState,
    reference: &str,
) -> AppResult<Artifact> {
    if reference.starts_with("sha256:") {
        return find_artifact_by_digest(&state.client, reference)
            .await?
            .ok_or_else(|| AppError::not_found("manifest", reference));
    }
    state.client.get::<Artifact>(reference).await
}

#[get("/v2/")]
pub async fn api_probe() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({}))
}

#[get("/v2/{name}/manifests/{reference}")]
pub async fn get_manifest(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
) -> AppResult<HttpResponse> {
    let (_name, reference) = path.into_inner();
    let artifact = resolve_manifest(&state, &reference).await?;
    Ok(HttpResponse::Ok()
        .content_type(MANIFEST_CONTENT_TYPE)
        .insert_header(("Docker-Content-Digest", artifact.manifest_digest.clone()))
        .body(artifact.manifest))
}

#[head("/v2/{name}/manifests/{reference}")]
pub async fn head_manifest(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
) -> AppResult<HttpResponse> {
    let (_name, reference) = path.into_inner();
    let artifact = resolve_manifest(&state, &reference).await?;
    Ok(HttpResponse::Ok()
        .content_type(MANIFEST_CONTENT_TYPE)
        .insert_header(("Docker-Content-Digest", artifact.manifest_digest))
        .insert_header(("Content-Length", artifact.manifest.len().to_string()))
        .finish())
}

#[put("/v2/{name}/manifests/{reference}")]
pub async fn put_manifest(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let (name, reference) = path.into_inner();
    let digest = sha256_digest(&body);

    if let Some(existing) = find_artifact_by_digest(&state.client, &digest).await? {
        log::debug!(
            "Manifest {} already stored as {:?}, deduplicating",
            digest,
            existing.id
        );
    } else {
        let app_id = match state.client.get::<App>(&name).await {
            Ok(app) => app.id,
            Err(e) if e.is_not_found() => {
                Some(state.client.create(&name, &App::default(), &[]).await?)
            }
            Err(e) => return Err(e),
        };

        let artifact = Artifact {
            id: None,
            app: app_id,
            manifest: String::from_utf8_lossy(&body).to_string(),
            manifest_digest: digest.clone(),
        };
        state.client.create(&reference, &artifact, &[]).await?;
        log::info!("Stored manifest {} for {}/{}", digest, name, reference);
    }

    Ok(HttpResponse::Created()
        .insert_header(("Docker-Content-Digest", digest))
        .insert_header((
            "Location",
            format!("/v2/{}/manifests/{}", name, reference),
        ))
        .finish())
}

#[get("/v2/{name}/blobs/{digest}")]
pub async fn get_blob(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
) -> AppResult<HttpResponse> {
    let (_name, digest) = path.into_inner();
    let blob = std::fs::read(state.blob_path(&digest))
        .map_err(|_| AppError::not_found("blob", &digest))?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header(("Docker-Content-Digest", digest))
        .body(blob))
}

#[head("/v2/{name}/blobs/{digest}")]
pub async fn head_blob(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
) -> AppResult<HttpResponse> {
    let (_name, digest) = path.into_inner();
    let meta = std::fs::metadata(state.blob_path(&digest))
        .map_err(|_| AppError::not_found("blob", &digest))?;
    Ok(HttpResponse::Ok()
        .insert_header(("Docker-Content-Digest", digest))
        .insert_header(("Content-Length", meta.len().to_string()))
        .finish())
}

#[post("/v2/{name}/blobs/uploads/")]
pub async fn start_upload(
    state: web::Data<RegistryState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let name = path.into_inner();
    let uuid = Uuid::new_v4().to_string();
    std::fs::write(state.upload_path(&uuid), b"")?;
    Ok(HttpResponse::Accepted()
        .insert_header((
            "Location",
            format!("/v2/{}/blobs/uploads/{}", name, uuid),
        ))
        .insert_header(("Docker-Upload-UUID", uuid))
        .insert_header(("Range", "0-0"))
        .finish())
}

#[patch("/v2/{name}/blobs/uploads/{uuid}")]
pub async fn patch_upload(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let (name, uuid) = path.into_inner();
    let upload = state.upload_path(&uuid);
    if !upload.exists() {
        return Err(AppError::not_found("upload", &uuid));
    }

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(&upload)?;
    file.write_all(&body)?;
    let stored = file.metadata()?.len();

    Ok(HttpResponse::Accepted()
        .insert_header((
            "Location",
            format!("/v2/{}/blobs/uploads/{}", name, uuid),
        ))
        .insert_header(("Docker-Upload-UUID", uuid))
        .insert_header(("Range", format!("0-{}", stored.saturating_sub(1))))
        .finish())
}

#[derive(Deserialize)]
pub struct FinishUploadQuery {
    digest: String,
}

#[put("/v2/{name}/blobs/uploads/{uuid}")]
pub async fn finish_upload(
    state: web::Data<RegistryState>,
    path: web::Path<(String, String)>,
    query: web::Query<FinishUploadQuery>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let (name, uuid) = path.into_inner();
    let upload = state.upload_path(&uuid);
    if !upload.exists() {
        return Err(AppError::not_found("upload", &uuid));
    }

    if !body.is_empty() {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&upload)?;
        file.write_all(&body)?;
    }

    let contents = std::fs::read(&upload)?;
    let computed = sha256_digest(&contents);
    if computed != query.digest {
        std::fs::remove_file(&upload).ok();
        return Err(AppError::validation(
            "digest-mismatch",
            format!("expected {}, got {}", query.digest, computed),
        ));
    }

    std::fs::rename(&upload, state.blob_path(&computed))?;
    log::debug!("Finished blob upload {} as {}", uuid, computed);

    Ok(HttpResponse::Created()
        .insert_header(("Docker-Content-Digest", computed.clone()))
        .insert_header(("Location", format!("/v2/{}/blobs/{}", name, computed)))
        .finish())
}

/// Registers every registry route on an actix app config.
pub fn configure(config: &mut web::ServiceConfig) {
    config
        .service(api_probe)
        .service(get_manifest)
        .service(head_manifest)
        .service(put_manifest)
        .service(get_blob)
        .service(head_blob)
        .service(start_upload)
        .service(patch_upload)
        .service(finish_upload);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::migrations::migrate;
    use crate::entity::store::EntityStore;
    use crate::entity::value::Value;
    use crate::schema;
    use actix_web::{test, App as ActixApp};
    use r2d2::Pool;
    use r2d2_sqlite::SqliteConnectionManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn state(storage: &TempDir) -> (web::Data<RegistryState>, EntityClient) {
        schema::register_all().unwrap();
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        migrate(pool.get().unwrap()).unwrap();
        let client = EntityClient::new(Arc::new(EntityStore::new(pool)));
        let state = RegistryState::new(client.clone(), storage.path().to_path_buf()).unwrap();
        (web::Data::new(state), client)
    }

    #[actix_web::test]
    async fn manifest_put_is_idempotent_by_digest() {
        let storage = TempDir::new().unwrap();
        let (state, client) = state(&storage);
        let app = test::init_service(
            ActixApp::new()
                .app_data(state.clone())
                .configure(configure),
        )
        .await;

        let manifest =
            br#"{"schemaVersion":2,"config":{"digest":"sha256:abcd1234","size":1024}}"#;
        let expected_digest = sha256_digest(manifest);

        let first = test::TestRequest::put()
            .uri("/v2/appX/manifests/ref-a")
            .set_payload(manifest.to_vec())
            .to_request();
        let response = test::call_service(&app, first).await;
        assert_eq!(response.status(), 201);
        assert_eq!(
            response.headers().get("Docker-Content-Digest").unwrap(),
            expected_digest.as_str()
        );

        let second = test::TestRequest::put()
            .uri("/v2/appX/manifests/ref-b")
            .set_payload(manifest.to_vec())
            .to_request();
        let response = test::call_service(&app, second).await;
        assert_eq!(response.status(), 201);

        // only the first reference names an artifact
        assert!(client.get::<Artifact>("artifact/ref-b").await.is_err());
        let mut artifact = Artifact::default();
        client
            .one_at_index(
                ARTIFACT_MANIFEST_DIGEST,
                &Value::String(expected_digest.clone()),
                &mut artifact,
            )
            .await
            .unwrap();
        assert_eq!(artifact.manifest_digest, expected_digest);

        // and both references resolve nothing vs something correctly
        let by_a = test::TestRequest::get()
            .uri("/v2/appX/manifests/ref-a")
            .to_request();
        let response = test::call_service(&app, by_a).await;
        assert_eq!(response.status(), 200);

        let by_b = test::TestRequest::get()
            .uri("/v2/appX/manifests/ref-b")
            .to_request();
        let response = test::call_service(&app, by_b).await;
        assert_eq!(response.status(), 404);

        let by_digest = test::TestRequest::get()
            .uri(&format!("/v2/appX/manifests/{}", expected_digest))
            .to_request();
        let response = test::call_service(&app, by_digest).await;
        assert_eq!(response.status(), 200);
    }

    #[actix_web::test]
    async fn chunked_blob_upload_round_trips() {
        let storage = TempDir::new().unwrap();
        let (state, _client) = state(&storage);
        let app = test::init_service(
            ActixApp::new()
                .app_data(state.clone())
                .configure(configure),
        )
        .await;

        let start = test::TestRequest::post()
            .uri("/v2/appX/blobs/uploads/")
            .to_request();
        let response = test::call_service(&app, start).await;
        assert_eq!(response.status(), 202);
        let uuid = response
            .headers()
            .get("Docker-Upload-UUID")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let chunk = test::TestRequest::patch()
            .uri(&format!("/v2/appX/blobs/uploads/{}", uuid))
            .set_payload(b"hello ".to_vec())
            .to_request();
        let response = test::call_service(&app, chunk).await;
        assert_eq!(response.status(), 202);
        assert_eq!(response.headers().get("Range").unwrap(), "0-5");

        let digest = sha256_digest(b"hello world");
        let finish = test::TestRequest::put()
            .uri(&format!(
                "/v2/appX/blobs/uploads/{}?digest={}",
                uuid, digest
            ))
            .set_payload(b"world".to_vec())
            .to_request();
        let response = test::call_service(&app, finish).await;
        assert_eq!(response.status(), 201);

        let fetch = test::TestRequest::get()
            .uri(&format!("/v2/appX/blobs/{}", digest))
            .to_request();
        let response = test::call_service(&app, fetch).await;
        assert_eq!(response.status(), 200);
        let body = test::read_body(response).await;
        assert_eq!(&body[..], b"hello world");
    }

    #[actix_web::test]
    async fn digest_mismatch_rejects_upload() {
        let storage = TempDir::new().unwrap();
        let (state, _client) = state(&storage);
        let app = test::init_service(
            ActixApp::new()
                .app_data(state.clone())
                .configure(configure),
        )
        .await;

        let start = test::TestRequest::post()
            .uri("/v2/appX/blobs/uploads/")
            .to_request();
        let response = test::call_service(&app, start).await;
        let uuid = response
            .headers()
            .get("Docker-Upload-UUID")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let finish = test::TestRequest::put()
            .uri(&format!(
                "/v2/appX/blobs/uploads/{}?digest=sha256:0000",
                uuid
            ))
            .set_payload(b"data".to_vec())
            .to_request();
        let response = test::call_service(&app, finish).await;
        assert_eq!(response.status(), 400);
    }
}
