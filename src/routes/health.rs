use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::toolchain::{Language, ToolchainTable};

#[derive(Serialize, Debug)]
struct StatusMessage {
    message: &'static str,
}

#[derive(Serialize, Debug)]
pub struct LanguageInfo {
    pub name: Language,
    pub file_name: String,
    pub compiled: bool,
}

#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok().json(StatusMessage {
        message: "Code runner API is running",
    })
}

#[get("/languages")]
pub async fn languages_handler(toolchains: web::Data<ToolchainTable>) -> impl Responder {
    let languages: Vec<LanguageInfo> = toolchains
        .iter()
        .map(|l| LanguageInfo {
            name: l.name,
            file_name: l.file_name.clone(),
            compiled: l.is_compiled(),
        })
        .collect();

    HttpResponse::Ok().json(languages)
}
