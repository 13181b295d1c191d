use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::actions::ActionDispatcher;
use crate::config::FlowConfig;
use crate::control::{interruptible_sleep, ExecutionControl};
use crate::errors::FlowError;
use crate::events::{EventSink, LogLevel};
use crate::keys::Key;
use crate::locator::RetryPolicy;
use crate::platforms::blocking;
use crate::products::Product;
use crate::selector::Selector;

/// Adds a list of products to the current sale: search each code, then
/// press "add" once per unit.
pub struct ProductBatch<'a> {
    dispatcher: &'a ActionDispatcher,
    control: &'a ExecutionControl,
    events: &'a Arc<dyn EventSink>,
    config: &'a FlowConfig,
}

impl<'a> ProductBatch<'a> {
    pub fn new(
        dispatcher: &'a ActionDispatcher,
        control: &'a ExecutionControl,
        events: &'a Arc<dyn EventSink>,
        config: &'a FlowConfig,
    ) -> Self {
        Self {
            dispatcher,
            control,
            events,
            config,
        }
    }

    /// Any failure fails the whole batch; pause and stop are honoured before
    /// every product and every unit.
    #[instrument(level = "debug", skip_all, fields(products = products.len()))]
    pub async fn run(
        &self,
        products: &[Product],
        token: &CancellationToken,
    ) -> Result<usize, FlowError> {
        let total = products.len();
        for (i, product) in products.iter().enumerate() {
            self.control.checkpoint(token).await?;
            self.events.log(
                LogLevel::Info,
                &format!(
                    "Product {}/{}: {} (x{})",
                    i + 1,
                    total,
                    product.code,
                    product.quantity
                ),
            );
            self.add_product(product, token).await?;
        }
        self.events.log(
            LogLevel::Success,
            &format!("{total} products added"),
        );
        Ok(total)
    }

    async fn add_product(
        &self,
        product: &Product,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        let batch = &self.config.batch;
        self.dismiss(&batch.accept_button, "stray modal", token).await?;

        let field = self
            .dispatcher
            .resolver()
            .resolve(
                &batch.search_field,
                &RetryPolicy::once(batch.search_field_timeout()),
                token,
            )
            .await
            .map_err(|e| match e {
                FlowError::ElementNotFound { selector, .. } => FlowError::FieldNotFound(selector),
                other => other,
            })?;

        let query = format!("{}{}", product.code, Key::Enter.webdriver_code());
        self.dispatcher.fill(&field, query).await?;
        interruptible_sleep(token, self.config.product_load_delay()).await?;

        for unit in 1..=product.quantity {
            self.control.checkpoint(token).await?;
            let add = self
                .dispatcher
                .resolver()
                .resolve(
                    &batch.add_button,
                    &RetryPolicy::once(batch.add_button_timeout()),
                    token,
                )
                .await?;
            blocking(self.dispatcher.session(), move |s| s.click(&add)).await?;
            debug!("Added unit {}/{} of {}", unit, product.quantity, product.code);
            interruptible_sleep(token, self.config.settle_delay()).await?;
            self.dismiss_upsell(&product.code, token).await?;
        }
        Ok(())
    }

    /// The POS may offer a recommendation after any single add.
    async fn dismiss_upsell(&self, code: &str, token: &CancellationToken) -> Result<(), FlowError> {
        let batch = &self.config.batch;
        if self
            .dispatcher
            .resolver()
            .probe(&batch.upsell_prompt, batch.probe_timeout())
            .await
            .is_some()
        {
            info!("Dismissing recommendation prompt after {}", code);
            self.dismiss(&batch.accept_button, "recommendation prompt", token)
                .await?;
        }
        Ok(())
    }

    /// Best-effort click on an optional dialog button. Only a stop during the
    /// settle wait is reported.
    async fn dismiss(
        &self,
        selector: &Selector,
        what: &str,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        let resolver = self.dispatcher.resolver();
        let Some(button) = resolver
            .probe(selector, self.config.batch.probe_timeout())
            .await
        else {
            return Ok(());
        };
        match blocking(self.dispatcher.session(), move |s| s.click(&button)).await {
            Ok(()) => {
                debug!("Dismissed {}", what);
                interruptible_sleep(token, self.config.settle_delay()).await
            }
            Err(e) => {
                debug!("Could not dismiss {}: {}", what, e);
                Ok(())
            }
        }
    }
}
