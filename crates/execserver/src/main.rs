use actix_cors::Cors;
use actix_web::{get, route, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use execcore::User;
use execmanager::{ExecutorManager, FlowExecService, LocalProjectManager};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
struct AppState {
    service: FlowExecService,
}

const USER_HEADER: &str = "X-Flow-User";

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "execserver"
    }))
}

/// The executor endpoint: dispatches on query parameters the way the
/// classic AJAX contract does. `ajax=...` selects an operation; a bare
/// `execid` renders the execution page data.
#[route("/executor", method = "GET", method = "POST")]
async fn executor(
    req: HttpRequest,
    query: web::Query<HashMap<String, String>>,
    data: web::Data<AppState>,
) -> impl Responder {
    let params = query.into_inner();

    let user = match req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        Some(id) => User::new(id),
        None => {
            return HttpResponse::Ok().json(json!({
                "error": format!("Missing {} header", USER_HEADER)
            }))
        }
    };

    if let Some(ajax) = params.get("ajax") {
        let body = handle_ajax(ajax, &params, &user, &data.service).await;
        return HttpResponse::Ok().json(body);
    }

    if let Some(execid) = params.get("execid") {
        let body = match data.service.execution_page(execid, &user).await {
            Ok(page) => serde_json::to_value(page).unwrap_or_default(),
            Err(e) => json!({ "execid": execid, "errorMsg": e.to_string() }),
        };
        return HttpResponse::Ok().json(body);
    }

    HttpResponse::Ok().json(json!({ "error": "No ajax action or execid specified" }))
}

async fn handle_ajax(
    ajax: &str,
    params: &HashMap<String, String>,
    user: &User,
    service: &FlowExecService,
) -> Value {
    if let Some(execid) = params.get("execid") {
        return match ajax {
            "fetchexecflow" => fetch_exec_flow(execid, user, service).await,
            "fetchexecflowupdate" => fetch_exec_flow_update(execid, params, user, service).await,
            _ => json!({ "error": format!("Unknown ajax action '{}'", ajax) }),
        };
    }

    let Some(project) = params.get("project") else {
        return json!({ "error": "Missing required parameter 'project'" });
    };

    match ajax {
        "executeFlow" => execute_flow(project, params, user, service).await,
        _ => json!({ "error": format!("Unknown ajax action '{}'", ajax) }),
    }
}

async fn fetch_exec_flow(execid: &str, user: &User, service: &FlowExecService) -> Value {
    match service.fetch_flow(execid, user).await {
        Ok(snapshot) => serde_json::to_value(snapshot).unwrap_or_default(),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn fetch_exec_flow_update(
    execid: &str,
    params: &HashMap<String, String>,
    user: &User,
    service: &FlowExecService,
) -> Value {
    let Some(raw) = params.get("lastUpdateTime") else {
        return json!({ "error": "Missing required parameter 'lastUpdateTime'" });
    };
    let since: i64 = match raw.parse() {
        Ok(v) => v,
        Err(_) => return json!({ "error": format!("Invalid lastUpdateTime '{}'", raw) }),
    };

    match service.fetch_flow_update(execid, since, user).await {
        Ok(update) => serde_json::to_value(update).unwrap_or_default(),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn execute_flow(
    project: &str,
    params: &HashMap<String, String>,
    user: &User,
    service: &FlowExecService,
) -> Value {
    let Some(flow) = params.get("flow") else {
        return json!({
            "project": project,
            "error": "Missing required parameter 'flow'"
        });
    };

    let disabled = match parse_disabled_overrides(params) {
        Ok(map) => map,
        Err(msg) => {
            return json!({ "project": project, "flow": flow, "error": msg });
        }
    };

    match service.execute_flow(project, flow, user, &disabled).await {
        Ok(submission) => serde_json::to_value(submission).unwrap_or_default(),
        Err(e) => json!({
            "project": project,
            "flow": flow,
            "error": e.to_string()
        }),
    }
}

/// Collect `disabled[nodeId]=bool` parameters into the override map.
fn parse_disabled_overrides(
    params: &HashMap<String, String>,
) -> Result<HashMap<String, bool>, String> {
    let mut disabled = HashMap::new();
    for (key, value) in params {
        let Some(node_id) = key
            .strip_prefix("disabled[")
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            continue;
        };
        let flag: bool = value
            .parse()
            .map_err(|_| format!("Invalid value '{}' for {}", value, key))?;
        disabled.insert(node_id.to_string(), flag);
    }
    Ok(disabled)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting executor server");

    let executions_dir =
        PathBuf::from(std::env::var("EXECUTIONS_DIR").unwrap_or_else(|_| "executions".to_string()));
    let store = Arc::new(ExecutorManager::new(executions_dir));

    let projects = Arc::new(LocalProjectManager::new());
    let projects_dir =
        PathBuf::from(std::env::var("PROJECTS_DIR").unwrap_or_else(|_| "projects".to_string()));
    if projects_dir.is_dir() {
        let loaded = projects.load_dir(&projects_dir).await?;
        info!("Loaded {} projects from {}", loaded, projects_dir.display());
    } else {
        info!(
            "Projects directory {} not found, starting empty",
            projects_dir.display()
        );
    }

    let app_state = web::Data::new(AppState {
        service: FlowExecService::new(store, projects),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(executor)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use execcore::{Capability, FlowGraph, Project};

    async fn test_state() -> (tempfile::TempDir, web::Data<AppState>) {
        let base = tempfile::tempdir().unwrap();
        let store = Arc::new(ExecutorManager::new(base.path()));

        let projects = Arc::new(LocalProjectManager::new());
        let mut p1 = Project::new("p1");
        let mut graph = FlowGraph::new("f1");
        graph.add_node("a").add_node("b");
        graph.add_edge("a", "b");
        p1.add_flow(graph);
        p1.grant("u1", Capability::Read);
        p1.grant("u1", Capability::Execute);
        projects.insert(p1).await;

        let state = web::Data::new(AppState {
            service: FlowExecService::new(store, projects),
        });
        (base, state)
    }

    #[actix_web::test]
    async fn health_endpoint_responds() {
        let app = test::init_service(App::new().service(health_check)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["status"], "healthy");
    }

    #[actix_web::test]
    async fn execute_then_fetch_roundtrip() {
        let (_base, state) = test_state().await;
        let app = test::init_service(App::new().app_data(state).service(executor)).await;

        let req = test::TestRequest::post()
            .uri("/executor?ajax=executeFlow&project=p1&flow=f1&disabled%5Ba%5D=true")
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert!(resp.get("error").is_none(), "unexpected error: {}", resp);
        let execid = resp["execid"].as_str().unwrap().to_string();
        assert_eq!(resp["project"], "p1");
        assert_eq!(resp["flow"], "f1");

        let req = test::TestRequest::get()
            .uri(&format!("/executor?ajax=fetchexecflow&execid={}", execid))
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        let nodes = resp["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["id"], "a");
        assert_eq!(nodes[0]["status"], "DISABLED");
        assert_eq!(nodes[1]["status"], "READY");
        assert_eq!(resp["edges"][0]["from"], "a");
        assert_eq!(resp["edges"][0]["target"], "b");
        assert_eq!(resp["submitUser"], "u1");

        let req = test::TestRequest::get()
            .uri(&format!(
                "/executor?ajax=fetchexecflowupdate&execid={}&lastUpdateTime=0",
                execid
            ))
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(resp["status"], "QUEUED");
    }

    #[actix_web::test]
    async fn errors_come_back_as_flat_error_fields() {
        let (_base, state) = test_state().await;
        let app = test::init_service(App::new().app_data(state).service(executor)).await;

        // unknown execution
        let req = test::TestRequest::get()
            .uri("/executor?ajax=fetchexecflow&execid=doesnotexist")
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["error"], "Cannot find execution 'doesnotexist'");

        // permission denied on submission
        let req = test::TestRequest::post()
            .uri("/executor?ajax=executeFlow&project=p1&flow=f1")
            .insert_header((USER_HEADER, "u2"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            resp["error"],
            "User u2 doesn't have EXECUTE permissions on p1"
        );

        // malformed watermark
        let req = test::TestRequest::get()
            .uri("/executor?ajax=fetchexecflowupdate&execid=x&lastUpdateTime=notanumber")
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["error"], "Invalid lastUpdateTime 'notanumber'");

        // missing user header
        let req = test::TestRequest::get()
            .uri("/executor?ajax=fetchexecflow&execid=x")
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["error"], "Missing X-Flow-User header");
    }

    #[actix_web::test]
    async fn execution_page_returns_project_and_flow() {
        let (_base, state) = test_state().await;
        let app = test::init_service(App::new().app_data(state).service(executor)).await;

        let req = test::TestRequest::post()
            .uri("/executor?ajax=executeFlow&project=p1&flow=f1")
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        let execid = resp["execid"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/executor?execid={}", execid))
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["projectName"], "p1");
        assert_eq!(resp["flowid"], "f1");

        let req = test::TestRequest::get()
            .uri("/executor?execid=missing")
            .insert_header((USER_HEADER, "u1"))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["errorMsg"], "Cannot find execution 'missing'");
    }
}
