// Item listing service wired through the component registry
//
// Run with:
//   cargo run --example item_app
//   curl http://127.0.0.1:8080/item/list
//
// Settings are read from an optional `trellis.toml` and `TRELLIS_*` variables,
// e.g. `TRELLIS_SERVER__PORT=9000`.

use rand::Rng;
use std::sync::Arc;
use trellis::prelude::*;

// ========== Components ==========

/// Produces random item names
struct RandomUtil;

impl RandomUtil {
    fn random_items(&self, n: usize) -> Vec<String> {
        let mut rng = rand::rng();
        (0..n).map(|_| format!("Item{}", rng.random_range(0..100))).collect()
    }
}

struct ItemService {
    util: Arc<RandomUtil>,
}

impl ItemService {
    fn list(&self) -> Vec<String> {
        self.util.random_items(10)
    }
}

struct ItemController {
    items: Arc<ItemService>,
}

fn random_util() -> ComponentDescriptor {
    ComponentDescriptor::component::<RandomUtil>().build(|_| Ok(RandomUtil))
}

fn item_service() -> ComponentDescriptor {
    ComponentDescriptor::service::<ItemService>()
        .inject::<RandomUtil>("util")
        .build(|wiring| {
            Ok(ItemService {
                util: wiring.bean::<RandomUtil>("util")?,
            })
        })
}

fn item_controller() -> ComponentDescriptor {
    ComponentDescriptor::controller::<ItemController>()
        .inject::<ItemService>("items")
        .route(RouteSpec::get("/item/list").named("list"), |ctrl, _, ctx| {
            ctx.write_json(&ctrl.items.list())
        })
        .build(|wiring| {
            Ok(ItemController {
                items: wiring.bean::<ItemService>("items")?,
            })
        })
}

register_component!(random_util);
register_component!(item_service);
register_component!(item_controller);

// ========== Main ==========

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manager = ConfigManager::builder()
        .env_prefix(trellis::config::DEFAULT_PREFIX)
        .optional_file("trellis.toml")
        .env()
        .build()?;
    let config = manager.app_config()?;

    let _guard = config.log_config()?.init()?;

    let index = MetadataIndex::scan_registered()?;
    let app = bootstrap(&index, &config)?;

    info!(port = app.config().port, "Item service ready at /item/list");
    app.listen().await?;
    Ok(())
}
