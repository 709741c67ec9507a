use crate::prelude::*;

use super::Coordinator;
use crate::display::Wave;
use crate::level;
use crate::modbus::Connector;

impl<C: Connector, M: LedMatrix + Send> Coordinator<C, M> {
    /// Sample both registers, store them, then show readings and the light wave.
    pub async fn day_tick(&mut self) -> Result<()> {
        self.stats.day_ticks += 1;
        let now = self.clock.now();

        let solar_register = self.solar_register.clone();
        let grid_register = self.grid_register.clone();
        let solar_store = self.solar.clone();
        let grid_store = self.grid.clone();

        let solar = self.acquire(&solar_register).await;
        if let Some(watts) = solar {
            self.record(&solar_store, Sample::new(now, watts));
        }
        let grid = self.acquire(&grid_register).await;
        if let Some(kw) = grid {
            self.record(&grid_store, Sample::new(now, kw));
        }

        self.drain_events().await?;

        let solar_history = values(self.history(&solar_store));
        let grid_history = values(self.history(&grid_store));

        let solar_now = solar.unwrap_or(0.0);
        let grid_now = grid.unwrap_or(0.0);
        let solar_kw = kilowatts(solar_now, &solar_register);
        let grid_kw = kilowatts(grid_now, &grid_register);

        let wave = Wave {
            solar_level: self.mapper.level(solar_now, &solar_history),
            grid_level: self.mapper.level(grid_now, &grid_history),
            solar_color: self.mapper.color(solar_now, &solar_history),
            grid_positive: grid_kw >= 0.0,
        };
        debug!("solar {:.3} kW, grid {:.3} kW, {:?}", solar_kw, grid_kw, wave);

        self.renderer
            .show_message(&format!("Sol: {:.1} kW", solar_kw), wave.solar_color)
            .await?;
        self.renderer
            .show_message(&format!("Grid: {:.1} kW", grid_kw), level::grid_color(grid_kw))
            .await?;
        self.renderer.light_wave(&wave).await
    }
}

fn values(samples: Vec<Sample>) -> Vec<f64> {
    samples.into_iter().map(|s| s.value).collect()
}

/// Registers report either W or kW; the display always talks kW.
fn kilowatts(value: f64, register: &RegisterDescriptor) -> f64 {
    if register.unit().eq_ignore_ascii_case("w") {
        value / 1000.0
    } else {
        value
    }
}
