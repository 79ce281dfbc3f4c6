use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Верхняя граница ёмкости таблицы окон
pub const MAX_WINDOWS_LIMIT: usize = 64;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub display: DisplayConfig,
    pub compositor: CompositorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    #[serde(default)]
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Имя дисплея X; `None` означает переменную DISPLAY
    #[serde(default)]
    pub name: Option<String>,
    pub direct_rendering: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompositorConfig {
    pub max_windows: usize,
    pub frame_interval_ms: u64,
    pub clear_color: [f32; 4],
    pub draw_background: bool,
    /// Снимать окно с учёта при unmap и брать снова при повторном map
    pub untrack_on_unmap: bool,
    /// Отслеживать перемещение и изменение размера через ConfigureNotify
    pub follow_configure: bool,
    /// Подхватывать уже отображённые окна при старте
    pub adopt_existing: bool,
}

impl CompositorConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
                filter: String::new(),
            },
            display: DisplayConfig {
                name: None,
                direct_rendering: true,
            },
            compositor: CompositorConfig {
                max_windows: 7,
                frame_interval_ms: 2,
                clear_color: [0.0, 0.0, 0.0, 0.0],
                draw_background: true,
                untrack_on_unmap: true,
                follow_configure: false,
                adopt_existing: true,
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GLCOMP_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        let compositor = &self.compositor;
        if compositor.max_windows == 0 || compositor.max_windows > MAX_WINDOWS_LIMIT {
            anyhow::bail!(
                "max_windows должно быть в диапазоне 1..={}, получено {}",
                MAX_WINDOWS_LIMIT,
                compositor.max_windows
            );
        }

        if compositor.frame_interval_ms > 1000 {
            anyhow::bail!("frame_interval_ms должно быть не больше 1000");
        }

        for (i, component) in compositor.clear_color.iter().enumerate() {
            if !(0.0..=1.0).contains(component) {
                anyhow::bail!("clear_color[{}] вне диапазона [0, 1]: {}", i, component);
            }
        }

        if let Some(name) = &self.display.name {
            if name.is_empty() {
                anyhow::bail!("Пустое имя дисплея");
            }
        }

        Ok(())
    }

    /// Директива фильтра tracing: явный фильтр важнее уровня
    pub fn log_directive(&self) -> &str {
        if self.logging.filter.is_empty() {
            &self.logging.level
        } else {
            &self.logging.filter
        }
    }
}
