use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        // checkout pages and dashboards live on other origins
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
        .allow_any_header()
        .max_age(3600)
}
