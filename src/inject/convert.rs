use super::InjectedValue;
use std::any::TypeId;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

type ParseFn = Arc<dyn Fn(&str) -> Result<InjectedValue, String> + Send + Sync>;
type MissingFn = Arc<dyn Fn() -> InjectedValue + Send + Sync>;

/// Turns one raw string (path segment, query value, header) into a typed value.
#[derive(Clone)]
pub struct Converter {
    parse: ParseFn,
    on_missing: Option<MissingFn>,
}

impl Converter {
    pub fn parse(&self, raw: &str) -> Result<InjectedValue, String> {
        (self.parse)(raw)
    }

    /// Value used when the source is absent; `None` means the value is required.
    pub fn missing(&self) -> Option<InjectedValue> {
        self.on_missing.as_ref().map(|f| f())
    }

    pub fn is_optional(&self) -> bool {
        self.on_missing.is_some()
    }
}

/// String-to-value converters keyed by target type.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<TypeId, Converter>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register::<String>()
            .register_with::<bool, _>(parse_bool)
            .register::<i8>()
            .register::<i16>()
            .register::<i32>()
            .register::<i64>()
            .register::<u8>()
            .register::<u16>()
            .register::<u32>()
            .register::<u64>()
            .register::<usize>()
            .register::<f32>()
            .register::<f64>()
            .register::<char>()
            .register::<uuid::Uuid>();
        registry
    }

    /// Registers `T` through its `FromStr` impl, along with `Option<T>`.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: FromStr + Send + Sync + 'static,
        T::Err: std::fmt::Display,
    {
        self.register_with::<T, _>(|raw| T::from_str(raw).map_err(|e| e.to_string()))
    }

    /// Registers `T` with a custom parse function, along with `Option<T>`.
    pub fn register_with<T, F>(&mut self, parse: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    {
        let parse = Arc::new(parse);

        let required = parse.clone();
        self.converters.insert(
            TypeId::of::<T>(),
            Converter {
                parse: Arc::new(move |raw: &str| required(raw).map(|v| Box::new(v) as InjectedValue)),
                on_missing: None,
            },
        );

        self.converters.insert(
            TypeId::of::<Option<T>>(),
            Converter {
                parse: Arc::new(move |raw: &str| parse(raw).map(|v| Box::new(Some(v)) as InjectedValue)),
                on_missing: Some(Arc::new(|| Box::new(None::<T>) as InjectedValue)),
            },
        );
        self
    }

    pub fn get(&self, type_id: TypeId) -> Option<&Converter> {
        self.converters.get(&type_id)
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.converters.contains_key(&type_id)
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}
