use crate::autoscale::config::AutoscaleConfig;
use crate::client::output::outputs::Output;

pub struct GlobalSettings {
    config: AutoscaleConfig,
    printer: Box<dyn Output>,
}

impl GlobalSettings {
    pub fn new(config: AutoscaleConfig, printer: Box<dyn Output>) -> Self {
        GlobalSettings { config, printer }
    }

    pub fn config(&self) -> &AutoscaleConfig {
        &self.config
    }

    pub fn printer(&self) -> &dyn Output {
        self.printer.as_ref()
    }
}
