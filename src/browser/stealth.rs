//! Fingerprint randomization for new browser contexts.
//!
//! Every context gets an init script that masks the usual automation
//! giveaways and randomizes the hardware/graphics surface a fingerprinting
//! script would read. The profile is sampled once per context so the values
//! stay self-consistent for that identity's lifetime.

use rand::Rng;
use rand::seq::SliceRandom;

const HARDWARE_CONCURRENCY: &[u32] = &[4, 6, 8, 12, 16];
const DEVICE_MEMORY: &[u32] = &[4, 8, 16, 32];
const SCREENS: &[(u32, u32)] = &[
    (1920, 1080),
    (2560, 1440),
    (1680, 1050),
    (1536, 864),
    (1440, 900),
    (1366, 768),
];
const WEBGL_PAIRS: &[(&str, &str)] = &[
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
    ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA GeForce GTX 1660 Direct3D11)"),
    ("Google Inc. (AMD)", "ANGLE (AMD Radeon RX 580 Direct3D11)"),
    ("Google Inc. (Intel)", "ANGLE (Intel UHD Graphics 630 Direct3D11)"),
];

/// Randomized per-context identity values.
#[derive(Debug, Clone)]
pub struct StealthProfile {
    pub hardware_concurrency: u32,
    pub device_memory: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub webgl_vendor: &'static str,
    pub webgl_renderer: &'static str,
    /// Per-context noise seeds for canvas/audio readouts.
    pub canvas_noise: f64,
    pub audio_noise: f64,
}

impl StealthProfile {
    pub fn randomize() -> Self {
        let mut rng = rand::thread_rng();
        let (screen_width, screen_height) = *SCREENS.choose(&mut rng).unwrap_or(&(1920, 1080));
        let (webgl_vendor, webgl_renderer) = *WEBGL_PAIRS
            .choose(&mut rng)
            .unwrap_or(&WEBGL_PAIRS[0]);
        Self {
            hardware_concurrency: *HARDWARE_CONCURRENCY.choose(&mut rng).unwrap_or(&8),
            device_memory: *DEVICE_MEMORY.choose(&mut rng).unwrap_or(&8),
            screen_width,
            screen_height,
            webgl_vendor,
            webgl_renderer,
            canvas_noise: rng.gen_range(0.00001..0.0001),
            audio_noise: rng.gen_range(0.00001..0.0001),
        }
    }

    /// Render the init script installed into every new context.
    pub fn build_script(&self) -> String {
        format!(
            r#"(() => {{
  Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
  Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {hc} }});
  Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {mem} }});
  Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4] }});
  Object.defineProperty(navigator, 'languages', {{ get: () => ['en-US', 'en'] }});
  Object.defineProperty(screen, 'width', {{ get: () => {sw} }});
  Object.defineProperty(screen, 'height', {{ get: () => {sh} }});
  Object.defineProperty(screen, 'availWidth', {{ get: () => {sw} }});
  Object.defineProperty(screen, 'availHeight', {{ get: () => {sh} - 40 }});
  window.chrome = window.chrome || {{ runtime: {{}} }};

  const origToDataURL = HTMLCanvasElement.prototype.toDataURL;
  HTMLCanvasElement.prototype.toDataURL = function (...args) {{
    const ctx = this.getContext('2d');
    if (ctx && this.width > 0 && this.height > 0) {{
      const pixel = ctx.getImageData(0, 0, 1, 1);
      pixel.data[0] = pixel.data[0] ^ Math.floor({canvas_noise} * 255 * 1000 % 2);
      ctx.putImageData(pixel, 0, 0);
    }}
    return origToDataURL.apply(this, args);
  }};

  const origGetParameter = WebGLRenderingContext.prototype.getParameter;
  WebGLRenderingContext.prototype.getParameter = function (parameter) {{
    if (parameter === 37445) return '{vendor}';
    if (parameter === 37446) return '{renderer}';
    return origGetParameter.apply(this, [parameter]);
  }};

  const origGetChannelData = AudioBuffer.prototype.getChannelData;
  AudioBuffer.prototype.getChannelData = function (...args) {{
    const data = origGetChannelData.apply(this, args);
    for (let i = 0; i < data.length; i += 500) {{
      data[i] = data[i] + {audio_noise};
    }}
    return data;
  }};
}})();"#,
            hc = self.hardware_concurrency,
            mem = self.device_memory,
            sw = self.screen_width,
            sh = self.screen_height,
            vendor = self.webgl_vendor,
            renderer = self.webgl_renderer,
            canvas_noise = self.canvas_noise,
            audio_noise = self.audio_noise,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_values_come_from_templates() {
        let profile = StealthProfile::randomize();
        assert!(HARDWARE_CONCURRENCY.contains(&profile.hardware_concurrency));
        assert!(DEVICE_MEMORY.contains(&profile.device_memory));
        assert!(
            SCREENS.contains(&(profile.screen_width, profile.screen_height))
        );
    }

    #[test]
    fn script_embeds_profile_values() {
        let profile = StealthProfile::randomize();
        let script = profile.build_script();
        assert!(script.contains("navigator, 'webdriver'"));
        assert!(script.contains(&format!("=> {}", profile.hardware_concurrency)));
        assert!(script.contains(profile.webgl_vendor));
        assert!(script.contains(profile.webgl_renderer));
    }
}
