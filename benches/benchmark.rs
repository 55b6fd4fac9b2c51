use criterion::{black_box, criterion_group, criterion_main, Criterion};

use relata::construct::RelatedObject;
use relata::datatype::{Kind, Value};
use relata::json;
use relata::schema::{Modifiers, TypeRegistry};

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut registry = TypeRegistry::new();
    let name = registry
        .declare("bench.name", Kind::Text, Modifiers::empty())
        .unwrap();

    let object = RelatedObject::new();
    object.set(&name, "initial").unwrap();
    c.bench_function("set existing", |b| {
        b.iter(|| object.set(&name, black_box("updated")).unwrap())
    });
    c.bench_function("get", |b| b.iter(|| black_box(object.get(&name))));

    // a wider object for enumeration and serialization
    let wide = RelatedObject::new();
    let mut types = Vec::new();
    for n in 0..100 {
        let rtype = registry
            .declare(&format!("bench.slot_{n}"), Kind::Int, Modifiers::empty())
            .unwrap();
        wide.set(&rtype, n as i64).unwrap();
        types.push(rtype);
    }
    c.bench_function("enumerate 100", |b| {
        b.iter(|| black_box(wide.relations(None).len()))
    });
    c.bench_function("to json 100", |b| {
        b.iter(|| black_box(json::object_to_text(&wide)))
    });

    let text = json::object_to_text(&wide);
    c.bench_function("parse 100", |b| {
        b.iter(|| black_box(json::parse_text(&text).unwrap()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
