use std::time::Duration;

use ravenrock_widget::{HttpUpsellApi, RecommendationParams, UpsellApi};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct ProbeArgs {
    pub storefront_url: String,
    pub shop: Option<String>,
    pub current_variant: Option<String>,
    pub product_handle: Option<String>,
    pub limit: Option<u32>,
}

/// Calls both proxy routes the way the storefront widget does and reports
/// what came back.
pub fn run(args: ProbeArgs) -> CommandResult {
    let config = match load_config("probe") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("probe") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let timeout = Duration::from_millis(config.widget.request_timeout_ms);
    let api = match HttpUpsellApi::new(&args.storefront_url, &config.server.proxy_prefix, timeout) {
        Ok(api) => api,
        Err(error) => return CommandResult::failure("probe", "client_init", error.to_string(), 3),
    };

    let params = RecommendationParams {
        shop: args.shop.clone(),
        current_variant: args.current_variant,
        product_handle: args.product_handle,
        limit: args.limit,
    };

    let result = runtime.block_on(async {
        let widget_config = api
            .widget_config(args.shop.as_deref())
            .await
            .map_err(|error| ("config_route", error.to_string(), 9u8))?;
        let recommendations = api
            .recommendations(&params)
            .await
            .map_err(|error| ("recommendations_route", error.to_string(), 9u8))?;
        Ok::<_, crate::commands::StepError>((widget_config, recommendations))
    });

    match result {
        Ok((widget_config, recommendations)) => {
            let variant_ids: Vec<&str> =
                recommendations.items.iter().map(|item| item.variant_id.as_str()).collect();
            let message = format!(
                "config ok (trigger delay {}s); {} recommendation(s){}",
                widget_config.trigger_delay_sec,
                variant_ids.len(),
                recommendations
                    .meta
                    .error
                    .as_deref()
                    .map(|error| format!(", error `{error}`"))
                    .unwrap_or_default()
            );
            CommandResult::success_with(
                "probe",
                message,
                Some(json!({
                    "config": widget_config,
                    "variantIds": variant_ids,
                    "meta": recommendations.meta,
                })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("probe", error_class, message, exit_code)
        }
    }
}
