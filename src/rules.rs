//! Keyword tables and line patterns that drive extraction.
//!
//! A [`RuleSet`] is plain serde data so a deployment can ship its own JSON
//! file; [`CompiledRules`] is the validated, regex-compiled form handed to
//! every extraction stage.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::fold_text;
use crate::model::{Category, SizeTier};
use crate::util::read_json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryKeywords {
    pub category: Category,
    pub keywords: Vec<String>,
}

/// Page-range category override for sources that group ads by section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagePrior {
    #[serde(default)]
    pub edition: Option<String>,
    pub first_page: u32,
    pub last_page: u32,
    pub category: Category,
}

impl PagePrior {
    pub fn covers(&self, edition: Option<&str>, page: u32) -> bool {
        let edition_matches = match (&self.edition, edition) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected == actual,
            (Some(_), None) => false,
        };
        edition_matches && (self.first_page..=self.last_page).contains(&page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct District {
    pub name: String,
    pub province: String,
    #[serde(default = "default_region_name")]
    pub region: String,
    #[serde(default)]
    pub variants: Vec<String>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizeBreakpoint {
    /// Tier applies when the combined text is strictly longer than this.
    pub above_chars: usize,
    pub tier: SizeTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub boilerplate_patterns: Vec<String>,
    pub opening_patterns: Vec<String>,
    pub sign_off_patterns: Vec<String>,
    pub contact_line_pattern: String,
    pub title_exclusion_pattern: String,
    pub phone_patterns: Vec<String>,
    pub whatsapp_cue_pattern: String,
    pub contact_label_pattern: String,
    pub price_pattern: String,
    pub categories: Vec<CategoryKeywords>,
    pub default_category: Category,
    pub page_priors: Vec<PagePrior>,
    pub districts: Vec<District>,
    pub landmark_patterns: Vec<String>,
    pub country: String,
    pub default_region_text: String,
    pub size_breakpoints: Vec<SizeBreakpoint>,
    pub size_floor: SizeTier,
    pub min_block_chars: usize,
    pub title_min_chars: usize,
    pub title_scan_lines: usize,
    pub fallback_title_words: usize,
    pub sign_off_lookahead: usize,
}

fn default_region_name() -> String {
    "Cusco".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn keywords(category: Category, items: &[&str]) -> CategoryKeywords {
    CategoryKeywords {
        category,
        keywords: strings(items),
    }
}

fn district(
    name: &str,
    province: &str,
    region: &str,
    variants: &[&str],
    lat: f64,
    lon: f64,
) -> District {
    District {
        name: name.to_string(),
        province: province.to_string(),
        region: region.to_string(),
        variants: strings(variants),
        lat,
        lon,
    }
}

impl Default for RuleSet {
    /// Rules for the Cusco regional classifieds magazine.
    fn default() -> Self {
        Self {
            boilerplate_patterns: strings(&[
                r"(?is)^Eres un experto.*?TEXTO DE LA P[ÁA]GINA A PROCESAR:[ \t]*\n?",
                r"(?im)^TEXTO DE LA P[ÁA]GINA A PROCESAR:[ \t]*$",
                r"(?im)^IMPORTANTE: Responde SOLO con JSON v[áa]lido[^\n]*$",
                r"(?m)^[ \t]*\d{1,3}[ \t]*$",
                r"(?im)^[ \t]*28 a[ñn]os uniendo[^\n]*$",
                r"(?im)^[ \t]*Revista: Publicaci[óo]n[^\n]*$",
                r"(?im)^[ \t]*RN Radio[^\n]*$",
                r"(?im)^[ \t]*LA RADIO[ \t]*$",
                r"(?m)^[ \t]*\d+\.\d+[ \t]*$",
                r"(?im)^[ \t]*FM[ \t]*$",
                r"(?im)^[ \t]*Cusco, del \d+ al \d+ de \w+ del \d+[^\n]*$",
                r"(?im)^[ \t]*A[ñn]o: \d+ / Edici[óo]n: \d+[^\n]*$",
                r"(?m)^[ \t]*R[ \t]*$",
                r"(?im)^[ \t]*Precio S/\.?[ \t]*$",
                r"(?im)^[ \t]*\d+\.\d+ v[íi]a a[ée]rea[ \t]*$",
                r"(?im)^[ \t]*Edici[óo]n Regional Cusco[^\n]*$",
                r"(?im)^[ \t]*Rueda ?de ?Negocios[ \t]*$",
                r"(?im)^[ \t]*Encu[eé]ntranos en:?[ \t]*$",
                r"(?im)^[ \t]*www\.ruedadenegocios\.com\.pe[ \t]*$",
                r"(?im)^[ \t]*Oficina (?:Wanchaq|San Sebasti[áa]n|Cusco):[^\n]*$",
                r"(?im)^[ \t]*B[uú]scanos como[ \t]*$",
                r"(?im)^[ \t]*M[áa]s cerca a ti[ \t]*$",
                r"(?im)^[ \t]*[a-zñ](?:[ \t]+[a-zñ]){0,12}[ \t]*$",
            ]),
            opening_patterns: strings(&[
                r"(?i)^¡?\s*(?:vendo|vende|se\s+vende|venta|remato|remate|gran\s+remate|traspaso|traspas[oa])\b",
                r"(?i)^¡?\s*(?:alquilo|alquila|se\s+alquila|alquiler|anticresis|se\s+da\s+en\s+anticresis)\b",
                r"(?i)^¡?\s*(?:ocasi[óo]n|oportunidad|terreno|terrenos|lotes?|a\s+solo)\b",
                r"(?i)^¡?\s*por\s+(?:emergencia|motivo|ocasi[óo]n|viaje)\b",
                r"(?i)^¡?\s*(?:compro|busco|necesito|se\s+necesita|se\s+requiere|requiero|solicito|se\s+solicita)\b",
            ]),
            sign_off_patterns: strings(&[
                r"(?i)\braz[óo]n\s*:?\s*(?:a\s+los?\s+|al\s+)?(?:cels?|celular|telfs?|tel|whats\s?app|wsp|wa)?\.?\s*:?\s*\(?\+?\d[\d\s\-()]{5,}",
                r"(?i)^(?:informes?|llamar|contacto|consultas)\s*:?\s*(?:a\s+los?\s+|al\s+)?(?:cels?|celular|telfs?|tel|whats\s?app|wsp|wa)?\.?\s*:?\s*\(?\+?\d[\d\s\-()]{5,}",
                r"(?i)^(?:cels?|celular|telfs?|tel|whats\s?app|wsp|wa)\.?\s*:?\s*\(?\+?\d[\d\s\-()]{5,}",
            ]),
            contact_line_pattern: r"(?i)^(?:(?:raz[óo]n|informes?|llamar|contacto|consultas|cels?|celular|telfs?|tel|tel[ée]fonos?|whats\s?app|wsp|wa|e-?mail|correo)\b|\(?\+?\d[\d\s\-()]{5,}$)".to_string(),
            title_exclusion_pattern: r"(?i)^(?:raz[óo]n|informes?|llamar|contacto|cels?|celular|telfs?|tel|whats\s?app|wsp|rn|fm)\b".to_string(),
            phone_patterns: strings(&[
                r"(?:\+51[\s.\-]?|\b)9\d{2}[\s.\-]?\d{3}[\s.\-]?\d{3}\b",
                r"\(0?84\)[\s.\-]?\d{6}\b",
                r"\b0?84[\s.\-]\d{6}\b",
                r"(?i)\b(?:telfs?|tel|tlf|fono|cels?|celular)\.?\s*:?\s*(\d{6,7})\b",
            ]),
            whatsapp_cue_pattern: r"(?i)(?:whats\s?app|\bwsp\b|wasap|watsap|\bwapp\b|\bw\.a\.|\bwa\b)".to_string(),
            contact_label_pattern: r"(?i)(?:\b(?:raz[óo]n|informes?|llamar|contacto|consultas|comunicarse)\s*:?\s*)?(?:\b(?:a\s+los?|al)\s+)?(?:\b(?:cels?|celular|telfs?|tel|tel[ée]fonos?|tlf|fono|whats\s?app|wsp|wa|e-?mail|correo)\.?\s*:?\s*)*".to_string(),
            price_pattern: r"(?i)(?:(?:S/\.?|US\$|\$|precio\s*:?|desde)\s*\d[\d.,]*\d|\b\d[\d.,]*\s*(?:soles|d[óo]lares))".to_string(),
            categories: vec![
                keywords(
                    Category::Jobs,
                    &[
                        "trabajo", "empleo", "busco", "necesito", "se necesita", "vacante",
                        "puesto", "sueldo", "requiere", "se requiere", "personal", "entrevista",
                        "cv", "curriculum", "experiencia", "postular", "contratar",
                    ],
                ),
                keywords(
                    Category::RealEstate,
                    &[
                        "casa", "departamento", "dpto", "minidepartamento", "alquiler", "alquilo",
                        "alquila", "anticresis", "terreno", "terrenos", "lote", "lotes",
                        "inmueble", "propiedad", "habitacion", "habitaciones", "cuarto", "local",
                        "oficina", "m2", "titulo de propiedad", "cochera",
                    ],
                ),
                keywords(
                    Category::Vehicles,
                    &[
                        "auto", "carro", "moto", "vehiculo", "camioneta", "bus", "combi",
                        "combis", "taxi", "placa", "kilometraje", "motor", "toyota", "nissan",
                        "hyundai", "volvo", "station wagon",
                    ],
                ),
                keywords(
                    Category::Services,
                    &[
                        "servicio", "servicios", "reparacion", "instalacion", "mantenimiento",
                        "limpieza", "diseno", "construccion", "plomeria", "electricidad",
                        "clases", "asesoria", "tramites", "transporte", "mudanzas",
                    ],
                ),
                keywords(
                    Category::Goods,
                    &[
                        "venta", "vendo", "compro", "producto", "articulo", "mercancia",
                        "oferta", "descuento", "precio", "remato", "equipo", "maquina",
                    ],
                ),
                keywords(
                    Category::Events,
                    &[
                        "evento", "fiesta", "celebracion", "concierto", "show", "festival",
                        "feria", "exposicion", "bautizo", "matrimonio",
                    ],
                ),
                keywords(
                    Category::Businesses,
                    &[
                        "negocio", "empresa", "comercio", "tienda", "franquicia", "inversion",
                        "socio", "traspaso", "traspasa", "restaurante", "hostal", "hotel",
                    ],
                ),
                keywords(
                    Category::Community,
                    &[
                        "comunidad", "ayuda", "donacion", "voluntario", "asociacion", "club",
                        "grupo", "perdido", "extraviado", "comunicado",
                    ],
                ),
            ],
            default_category: Category::Services,
            page_priors: Vec::new(),
            districts: vec![
                district("Wanchaq", "Cusco", "Cusco", &["Wanchaq", "Wánchaq", "Huanchac"], -13.52, -71.98),
                district("San Sebastián", "Cusco", "Cusco", &["San Sebastián", "San Sebastian"], -13.54, -71.95),
                district("Santiago", "Cusco", "Cusco", &["Santiago"], -13.525, -71.975),
                district("San Jerónimo", "Cusco", "Cusco", &["San Jerónimo", "San Jeronimo"], -13.55, -71.94),
                district("Saylla", "Cusco", "Cusco", &["Saylla"], -13.56, -71.92),
                district("Poroy", "Cusco", "Cusco", &["Poroy"], -13.48, -72.0),
                district("Ccorca", "Cusco", "Cusco", &["Ccorca"], -13.5, -72.02),
                district("Ollantaytambo", "Urubamba", "Cusco", &["Ollantaytambo"], -13.2581, -72.2633),
                district("Chinchero", "Urubamba", "Cusco", &["Chinchero"], -13.3922, -72.0478),
                district("Machupicchu", "Urubamba", "Cusco", &["Machupicchu", "Machu Picchu", "Aguas Calientes"], -13.1631, -72.545),
                district("Urubamba", "Urubamba", "Cusco", &["Urubamba", "Valle Sagrado"], -13.3053, -72.1156),
                district("Calca", "Calca", "Cusco", &["Calca"], -13.3333, -71.95),
                district("Sicuani", "Canchis", "Cusco", &["Sicuani", "Canchis"], -14.2694, -71.2256),
                district("Santa Ana", "La Convención", "Cusco", &["Quillabamba", "La Convención", "La Convencion"], -12.87, -72.69),
                district("Abancay", "Abancay", "Apurímac", &["Abancay"], -13.6333, -72.8833),
                district("Cusco", "Cusco", "Cusco", &["Cusco", "Cuzco", "Plaza de Armas", "Cercado"], -13.5319, -71.9675),
            ],
            landmark_patterns: strings(&[
                r"\b(?i:Av\.?|Avenida|Calle|Jr\.?|Jir[óo]n|Pasaje|Psje\.?|Prolongaci[óo]n|Prol\.)\s+(?:(?:de|del|la|las|los|el)\s+)*[\p{Lu}0-9]\w+\.?(?:\s+(?:(?:de|del|la|las|los|el)\s+)*\p{Lu}\w+\.?){0,3}(?:\s*(?:N[°º]\.?|#|Nro\.?)?\s*\d{1,5}\b)?",
                r"\b(?i:Urb\.?|Urbanizaci[óo]n|Residencial|Asoc\.|APV)\s+(?:(?:de|del|la|las|los|el)\s+)*\p{Lu}\w+\.?(?:\s+(?:(?:de|del|la|las|los|el)\s+)*\p{Lu}\w+\.?){0,3}",
                r"\b(?i:Edificio)\s+\p{Lu}\w+(?:\s+\p{Lu}\w+){0,2}",
                r"\b(?i:Mz)\.?\s*[A-Z0-9]{1,3}\s*,?\s*(?i:Lote|Lt)\.?\s*\d{1,4}",
            ]),
            country: "Perú".to_string(),
            default_region_text: "Cusco, Perú".to_string(),
            size_breakpoints: vec![
                SizeBreakpoint { above_chars: 1200, tier: SizeTier::Huge },
                SizeBreakpoint { above_chars: 700, tier: SizeTier::Large },
                SizeBreakpoint { above_chars: 400, tier: SizeTier::Medium },
                SizeBreakpoint { above_chars: 250, tier: SizeTier::Small },
            ],
            size_floor: SizeTier::Small,
            min_block_chars: 30,
            title_min_chars: 6,
            title_scan_lines: 5,
            fallback_title_words: 8,
            sign_off_lookahead: 5,
        }
    }
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path).with_context(|| format!("failed to load rules from {}", path.display()))
    }
}

#[derive(Debug)]
pub struct CompiledCategory {
    pub category: Category,
    /// Folded keywords, deduplicated, in declaration order.
    pub keywords: Vec<String>,
}

#[derive(Debug)]
pub struct CompiledDistrict {
    pub district: District,
    pub folded_variants: Vec<String>,
}

#[derive(Debug)]
pub struct CompiledRules {
    pub boilerplate: Vec<Regex>,
    pub opening: Vec<Regex>,
    pub sign_off: Vec<Regex>,
    pub contact_line: Regex,
    pub title_exclusion: Regex,
    pub bare_amount: Regex,
    pub phones: Vec<Regex>,
    pub email: Regex,
    pub whatsapp_cue: Regex,
    pub sentinel_run: Regex,
    pub labelled_sentinel: Regex,
    pub price: Regex,
    pub categories: Vec<CompiledCategory>,
    pub default_category: Category,
    pub page_priors: Vec<PagePrior>,
    pub districts: Vec<CompiledDistrict>,
    pub landmarks: Vec<Regex>,
    pub country: String,
    pub default_region_text: String,
    pub size_breakpoints: Vec<SizeBreakpoint>,
    pub size_floor: SizeTier,
    pub min_block_chars: usize,
    pub title_min_chars: usize,
    pub title_scan_lines: usize,
    pub fallback_title_words: usize,
    pub sign_off_lookahead: usize,
}

impl CompiledRules {
    pub fn compile(rules: &RuleSet) -> Result<Self> {
        if rules.categories.is_empty() {
            bail!("rule set declares no categories");
        }
        if rules.min_block_chars == 0 {
            bail!("min_block_chars must be positive");
        }

        let mut seen = HashSet::new();
        for entry in &rules.categories {
            if !seen.insert(entry.category) {
                bail!("category {} is declared more than once", entry.category);
            }
        }

        let categories = rules
            .categories
            .iter()
            .map(|entry| {
                let mut unique = HashSet::new();
                let keywords = entry
                    .keywords
                    .iter()
                    .map(|keyword| fold_text(keyword))
                    .filter(|keyword| !keyword.is_empty() && unique.insert(keyword.clone()))
                    .collect();
                CompiledCategory {
                    category: entry.category,
                    keywords,
                }
            })
            .collect();

        let districts = rules
            .districts
            .iter()
            .map(|district| {
                let mut folded_variants: Vec<String> = district
                    .variants
                    .iter()
                    .chain(std::iter::once(&district.name))
                    .map(|variant| fold_text(variant))
                    .filter(|variant| !variant.is_empty())
                    .collect();
                folded_variants.dedup();
                CompiledDistrict {
                    district: district.clone(),
                    folded_variants,
                }
            })
            .collect();

        let mut size_breakpoints = rules.size_breakpoints.clone();
        size_breakpoints.sort_by(|a, b| b.above_chars.cmp(&a.above_chars));

        Ok(Self {
            boilerplate: compile_all(&rules.boilerplate_patterns, "boilerplate")?,
            opening: compile_all(&rules.opening_patterns, "opening")?,
            sign_off: compile_all(&rules.sign_off_patterns, "sign-off")?,
            contact_line: compile_one(&rules.contact_line_pattern, "contact line")?,
            title_exclusion: compile_one(&rules.title_exclusion_pattern, "title exclusion")?,
            bare_amount: compile_one(r"^(?:S/\.?|US\$|\$)?\s*[\d.,\s]+$", "bare amount")?,
            phones: compile_all(&rules.phone_patterns, "phone")?,
            email: compile_one(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}", "email")?,
            whatsapp_cue: compile_one(&rules.whatsapp_cue_pattern, "whatsapp cue")?,
            sentinel_run: compile_one(
                r"\x00(?:[ \t]*(?:/|,|;|-|\by\b|\bo\b)[ \t]*\x00)+",
                "contact run",
            )?,
            labelled_sentinel: compile_one(
                &format!(
                    r"{}(?:\+?51[ \t.\-]*)?\x00",
                    rules.contact_label_pattern
                ),
                "contact label",
            )?,
            price: compile_one(&rules.price_pattern, "price")?,
            categories,
            default_category: rules.default_category,
            page_priors: rules.page_priors.clone(),
            districts,
            landmarks: compile_all(&rules.landmark_patterns, "landmark")?,
            country: rules.country.clone(),
            default_region_text: rules.default_region_text.clone(),
            size_breakpoints,
            size_floor: rules.size_floor,
            min_block_chars: rules.min_block_chars,
            title_min_chars: rules.title_min_chars,
            title_scan_lines: rules.title_scan_lines.max(1),
            fallback_title_words: rules.fallback_title_words.max(1),
            sign_off_lookahead: rules.sign_off_lookahead,
        })
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let rules = match path {
            Some(path) => RuleSet::load(path)?,
            None => RuleSet::default(),
        };
        Self::compile(&rules)
    }
}

fn compile_one(pattern: &str, label: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("failed to compile {label} regex: {pattern}"))
}

fn compile_all(patterns: &[String], label: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| compile_one(pattern, label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_compile() {
        let compiled = CompiledRules::compile(&RuleSet::default()).unwrap();
        assert_eq!(compiled.categories.len(), 8);
        assert_eq!(compiled.size_breakpoints[0].tier, SizeTier::Huge);
    }

    #[test]
    fn partial_rules_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"min_block_chars": 12, "page_priors": [{"first_page": 2, "last_page": 6, "category": "real-estate"}]}"#,
        )
        .unwrap();

        let compiled = CompiledRules::load_or_default(Some(&path)).unwrap();
        assert_eq!(compiled.min_block_chars, 12);
        assert_eq!(compiled.page_priors.len(), 1);
        assert_eq!(compiled.default_category, Category::Services);
        assert!(!compiled.boilerplate.is_empty());
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let rules = RuleSet {
            opening_patterns: vec!["(unclosed".to_string()],
            ..RuleSet::default()
        };
        let err = CompiledRules::compile(&rules).unwrap_err();
        assert!(err.to_string().contains("opening"));
    }

    #[test]
    fn duplicate_category_is_rejected() {
        let mut rules = RuleSet::default();
        rules.categories.push(keywords(Category::Jobs, &["otro"]));
        assert!(CompiledRules::compile(&rules).is_err());
    }

    #[test]
    fn page_prior_scoped_to_edition() {
        let prior = PagePrior {
            edition: Some("R2561".to_string()),
            first_page: 2,
            last_page: 6,
            category: Category::RealEstate,
        };
        assert!(prior.covers(Some("R2561"), 4));
        assert!(!prior.covers(Some("R2562"), 4));
        assert!(!prior.covers(None, 4));
        assert!(!prior.covers(Some("R2561"), 7));
    }
}
