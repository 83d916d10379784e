use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::{LimitsConfig, ServerConfig};
use crate::queue::ExecutionQueue;
use crate::routes::{configure, json_error_handler};
use crate::toolchain::ToolchainTable;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 5000;

/// Room for JSON escaping and the other request fields on top of the code itself
const JSON_OVERHEAD: usize = 16 * 1024;

/// JSON extractor settings shared by the server and its tests
pub fn json_config(limits: &LimitsConfig) -> web::JsonConfig {
    let json_limit = 2 * limits.max_code_size.0 as usize + JSON_OVERHEAD;
    web::JsonConfig::default()
        .limit(json_limit)
        .error_handler(json_error_handler)
}

pub fn build_server(
    server_config: ServerConfig,
    toolchains: ToolchainTable,
    limits: LimitsConfig,
    queue: Arc<ExecutionQueue>,
) -> std::io::Result<Server> {
    let json = json_config(&limits);
    let toolchains = web::Data::new(toolchains);
    let limits = web::Data::new(limits);
    let queue = web::Data::from(queue);

    let bind_address = server_config
        .bind_address
        .unwrap_or(DEFAULT_BIND_ADDRESS.to_string());
    let bind_port = server_config.bind_port.unwrap_or(DEFAULT_BIND_PORT);
    log::info!("Listening on {bind_address}:{bind_port}");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(toolchains.clone())
            .app_data(limits.clone())
            .app_data(queue.clone())
            .app_data(json.clone())
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .configure(configure)
    })
    .bind((bind_address, bind_port))?
    .run();

    Ok(server)
}
