//! Upload server storing files under `UPLOAD_DIR` (default: the system temp dir).
//!
//! ```sh
//! curl -H 'x-upload-token: 1' -F title=holiday -F photo=@beach.jpg http://127.0.0.1:8080/api/upload
//! ```

use std::{env, io, path::PathBuf};

use actix_upload::{ParserOptions, Upload, UploadConfig, UploadResult};
use actix_web::{middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};

async fn respond(_req: HttpRequest, result: UploadResult) -> actix_web::Result<HttpResponse> {
    if let Some(err) = result.error {
        log::info!("upload failed: {}", err);
        return Ok(actix_web::ResponseError::error_response(&err));
    }

    let mut body = String::new();

    for (name, value) in &result.fields {
        for value in value {
            body.push_str(&format!("field {name}: {value}\n"));
        }
    }

    for (name, files) in &result.files {
        for file in files {
            body.push_str(&format!(
                "file {name}: {} -> {} ({} bytes)\n",
                file.original_file_name.as_deref().unwrap_or("-"),
                file.path.display(),
                file.size,
            ));
        }
    }

    Ok(HttpResponse::Ok().content_type("text/plain").body(body))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let upload_dir = env::var_os("UPLOAD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());

    let config = UploadConfig::default().parser(
        ParserOptions::default()
            .upload_dir(upload_dir)
            .keep_extensions(true)
            .multiples(true),
    );

    // fail at startup instead of inside a worker
    Upload::new(config.clone()).map_err(io::Error::other)?;

    log::info!("starting HTTP server at http://{bind_addr}");

    HttpServer::new(move || {
        let upload = Upload::new(config.clone())
            .expect("validated above")
            .validator(|req| async move { Ok(req.headers().contains_key("x-upload-token")) })
            .response(respond);

        App::new()
            .wrap(upload)
            .wrap(Logger::default())
            .default_service(web::to(|| async {
                HttpResponse::Forbidden().body("upload rejected\n")
            }))
    })
    .bind(bind_addr)?
    .workers(2)
    .run()
    .await
}
